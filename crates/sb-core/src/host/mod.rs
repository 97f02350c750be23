//! Host browser APIs
//!
//! SiteBlock never intercepts requests itself. The host's declarative rule
//! engine does the blocking and its key-value storage keeps strict mode
//! state. These traits are the seam between the bookkeeping in this crate
//! and whatever provides those APIs (the extension runtime, a state file,
//! or the in-memory host used by tests).

mod memory;

pub use memory::*;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostError;
use crate::types::DnrRule;

/// Storage key for the deferred-reactivation list.
pub const INACTIVE_RULES_KEY: &str = "inactiveRules";
/// Storage key for the strict mode flag.
pub const STRICT_MODE_KEY: &str = "strictMode";
/// Storage key for the daily disable quota.
pub const DISABLE_QUOTA_KEY: &str = "disableQuota";

// =============================================================================
// Traits
// =============================================================================

/// The host's declarative rule engine.
pub trait RuleEngine {
    fn get_dynamic_rules(&self) -> Result<Vec<DnrRule>, HostError>;

    /// Remove `remove_rule_ids`, then add `add_rules`, atomically.
    fn update_dynamic_rules(
        &mut self,
        remove_rule_ids: &[u32],
        add_rules: Vec<DnrRule>,
    ) -> Result<(), HostError>;
}

/// The host's local key-value storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, HostError>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), HostError>;
}

/// Access to the focused tab.
pub trait TabQuery {
    fn active_tab_url(&self) -> Result<Option<String>, HostError>;
}

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =============================================================================
// Typed Storage Access
// =============================================================================

/// Read and decode a stored value. Missing keys and `null` read as None.
pub fn load<T: DeserializeOwned>(store: &impl KeyValueStore, key: &str) -> Result<Option<T>, HostError> {
    match store.get(key)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| HostError::Malformed {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// Encode and store a value.
pub fn save<T: Serialize>(store: &mut impl KeyValueStore, key: &str, value: &T) -> Result<(), HostError> {
    let value = serde_json::to_value(value).map_err(|e| HostError::Storage(e.to_string()))?;
    store.set(key, value)
}

// =============================================================================
// Rule Diffs
// =============================================================================

/// Arguments for one `updateDynamicRules` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub remove_rule_ids: Vec<u32>,
    pub add_rules: Vec<DnrRule>,
}

impl RuleUpdate {
    /// The single update that turns `before` into `after`.
    ///
    /// Changed rules are removed and re-added under the same id.
    pub fn between(before: &[DnrRule], after: &[DnrRule]) -> Self {
        let mut update = Self::default();

        for old in before {
            match after.iter().find(|rule| rule.id == old.id) {
                Some(new) if new == old => {}
                _ => update.remove_rule_ids.push(old.id),
            }
        }

        for new in after {
            match before.iter().find(|rule| rule.id == new.id) {
                Some(old) if old == new => {}
                _ => update.add_rules.push(new.clone()),
            }
        }

        update
    }

    pub fn is_empty(&self) -> bool {
        self.remove_rule_ids.is_empty() && self.add_rules.is_empty()
    }
}
