//! In-memory host
//!
//! Backs the wasm bindings (state is loaded from and diffed back to the
//! browser around each call), the CLI state file and the tests.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::{Clock, KeyValueStore, RuleEngine, TabQuery};
use crate::error::HostError;
use crate::types::DnrRule;

// =============================================================================
// Rule Engine
// =============================================================================

/// Rule engine keeping rules in id order.
///
/// Rejects updates the browser would reject: adding an id that is still
/// present after the removals.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleEngine {
    rules: BTreeMap<u32, DnrRule>,
    reject_with: Option<String>,
}

impl MemoryRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = DnrRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|rule| (rule.id, rule)).collect(),
            reject_with: None,
        }
    }

    /// Make every following update fail with `reason` until cleared.
    pub fn reject_updates(&mut self, reason: Option<String>) {
        self.reject_with = reason;
    }

    pub fn rules(&self) -> impl Iterator<Item = &DnrRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleEngine for MemoryRuleEngine {
    fn get_dynamic_rules(&self) -> Result<Vec<DnrRule>, HostError> {
        Ok(self.rules.values().cloned().collect())
    }

    fn update_dynamic_rules(
        &mut self,
        remove_rule_ids: &[u32],
        add_rules: Vec<DnrRule>,
    ) -> Result<(), HostError> {
        if let Some(reason) = &self.reject_with {
            return Err(HostError::RuleEngine(reason.clone()));
        }

        let removed: BTreeSet<u32> = remove_rule_ids.iter().copied().collect();
        let mut added = BTreeSet::new();
        for rule in &add_rules {
            let still_present = self.rules.contains_key(&rule.id) && !removed.contains(&rule.id);
            if still_present || !added.insert(rule.id) {
                return Err(HostError::RuleEngine(format!(
                    "Rule with id {} does not have a unique ID",
                    rule.id
                )));
            }
        }

        for id in &removed {
            self.rules.remove(id);
        }
        for rule in add_rules {
            self.rules.insert(rule.id, rule);
        }
        Ok(())
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Key-value store that remembers which keys were written.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
    dirty: BTreeSet<String>,
    reject_with: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: values.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Make every following write fail with `reason` until cleared.
    pub fn reject_writes(&mut self, reason: Option<String>) {
        self.reject_with = reason;
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Values written since the last call, for replaying into the host.
    pub fn take_changes(&mut self) -> BTreeMap<String, Value> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|key| self.values.get(&key).map(|value| (key, value.clone())))
            .collect()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, HostError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), HostError> {
        if let Some(reason) = &self.reject_with {
            return Err(HostError::Storage(reason.clone()));
        }
        self.values.insert(key.to_string(), value);
        self.dirty.insert(key.to_string());
        Ok(())
    }
}

// =============================================================================
// Tabs and Time
// =============================================================================

/// A single focused tab.
#[derive(Debug, Clone, Default)]
pub struct MemoryTabs {
    pub url: Option<String>,
}

impl TabQuery for MemoryTabs {
    fn active_tab_url(&self) -> Result<Option<String>, HostError> {
        Ok(self.url.clone())
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Cell::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_rejects_duplicate_ids() {
        let settings = Settings::default();
        let mut engine = MemoryRuleEngine::with_rules([DnrRule::new(1, "^https?://a\\.com/?$", true, &settings)]);

        let err = engine
            .update_dynamic_rules(&[], vec![DnrRule::new(1, "^https?://b\\.com/?$", true, &settings)])
            .unwrap_err();
        assert!(matches!(err, HostError::RuleEngine(_)));
        assert_eq!(engine.len(), 1);

        engine
            .update_dynamic_rules(&[1], vec![DnrRule::new(1, "^https?://b\\.com/?$", true, &settings)])
            .unwrap();
        assert_eq!(engine.rules().next().unwrap().pattern(), "^https?://b\\.com/?$");
    }

    #[test]
    fn test_take_changes() {
        let mut store = MemoryStore::with_values([("strictMode".to_string(), Value::Bool(false))]);
        store.set("strictMode", Value::Bool(true)).unwrap();
        let changes = store.take_changes();
        assert_eq!(changes.get("strictMode"), Some(&Value::Bool(true)));
        assert!(store.take_changes().is_empty());
    }

    #[test]
    fn test_manual_clock() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), start + Duration::hours(2));
    }
}
