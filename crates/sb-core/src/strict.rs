//! Strict mode: deferred reactivation
//!
//! With strict mode on, a disabled rule is only disabled for a block period.
//! Each disabled rule gets a deferred-reactivation entry; [`reconcile`] runs
//! on navigation events and turns expired entries back into active rules.
//! There is no timer, so reactivation happens on the first navigation after
//! the entry expires.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::config::Settings;
use crate::error::{HostError, Result};
use crate::host::{self, KeyValueStore, RuleEngine, INACTIVE_RULES_KEY, STRICT_MODE_KEY};
use crate::store::BulkPlan;
use crate::types::{DeferredEntry, DnrRule};

// =============================================================================
// Stored State
// =============================================================================

/// Whether strict mode is on. Missing or malformed flags read as off.
pub fn is_enabled(store: &impl KeyValueStore) -> Result<bool> {
    match host::load::<bool>(store, STRICT_MODE_KEY) {
        Ok(flag) => Ok(flag.unwrap_or(false)),
        Err(HostError::Malformed { reason, .. }) => {
            warn!("strictMode is not a boolean: {}", reason);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// The deferred-reactivation list. Malformed lists read as empty.
pub fn load_deferred(store: &impl KeyValueStore) -> Result<Vec<DeferredEntry>> {
    match host::load::<Vec<DeferredEntry>>(store, INACTIVE_RULES_KEY) {
        Ok(entries) => Ok(entries.unwrap_or_default()),
        Err(HostError::Malformed { reason, .. }) => {
            warn!("ignoring malformed deferred list: {}", reason);
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

fn save_deferred(store: &mut impl KeyValueStore, entries: &[DeferredEntry]) -> Result<()> {
    host::save(store, INACTIVE_RULES_KEY, &entries)?;
    Ok(())
}

// =============================================================================
// Toggling
// =============================================================================

/// Switch strict mode. Returns how many rules were put on the deferred list.
///
/// Turning it on defers every currently inactive rule by one block period.
/// Turning it off clears the list.
pub fn set_strict_mode(
    engine: &impl RuleEngine,
    store: &mut impl KeyValueStore,
    enabled: bool,
    now: DateTime<Utc>,
    settings: &Settings,
) -> Result<usize> {
    let entries: Vec<DeferredEntry> = if enabled {
        let unblock_date = now + settings.block_period();
        engine
            .get_dynamic_rules()?
            .into_iter()
            .filter(|rule| !rule.is_active())
            .map(|rule| DeferredEntry {
                id: rule.id,
                unblock_date,
                url_to_block: rule.condition.regex_filter,
            })
            .collect()
    } else {
        Vec::new()
    };

    // Flag last when switching on, first when switching off.
    if enabled {
        save_deferred(store, &entries)?;
        host::save(store, STRICT_MODE_KEY, &enabled)?;
    } else {
        host::save(store, STRICT_MODE_KEY, &enabled)?;
        save_deferred(store, &entries)?;
    }

    info!("strict mode {} ({} rule(s) deferred)", if enabled { "on" } else { "off" }, entries.len());
    Ok(entries.len())
}

/// Fold an applied bulk update into the deferred list.
///
/// Newly disabled rules get a fresh entry, re-enabled rules lose theirs and
/// rules that stay disabled keep their date but take the edited pattern.
pub fn record_changes(
    store: &mut impl KeyValueStore,
    plan: &BulkPlan,
    now: DateTime<Utc>,
    settings: &Settings,
) -> Result<()> {
    let mut entries = load_deferred(store)?;
    let unblock_date = now + settings.block_period();

    entries.retain(|entry| !plan.activated.contains(&entry.id) && !plan.deactivated.contains(&entry.id));

    for rule in &plan.rules {
        if rule.is_active() {
            continue;
        }
        if plan.deactivated.contains(&rule.id) {
            entries.push(DeferredEntry {
                id: rule.id,
                unblock_date,
                url_to_block: rule.pattern().to_string(),
            });
        } else if let Some(entry) = entries.iter_mut().find(|entry| entry.id == rule.id) {
            entry.url_to_block = rule.pattern().to_string();
        }
    }

    save_deferred(store, &entries)
}

/// Drop the entries of deleted rules.
pub fn forget(store: &mut impl KeyValueStore, ids: &[u32]) -> Result<()> {
    let mut entries = load_deferred(store)?;
    let before = entries.len();
    entries.retain(|entry| !ids.contains(&entry.id));
    if entries.len() != before {
        save_deferred(store, &entries)?;
    }
    Ok(())
}

// =============================================================================
// Reconciliation
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Rules forced back to active
    pub reactivated: Vec<u32>,
    /// Entries still waiting
    pub pending: usize,
}

/// Reactivate rules whose block period elapsed.
///
/// Also re-enables inactive rules that have no entry at all, since strict
/// mode allows no open-ended disabling. Does nothing when strict mode is off.
pub fn reconcile(
    engine: &mut impl RuleEngine,
    store: &mut impl KeyValueStore,
    now: DateTime<Utc>,
    settings: &Settings,
) -> Result<Reconciled> {
    if !is_enabled(store)? {
        return Ok(Reconciled::default());
    }

    let entries = load_deferred(store)?;
    let rules = engine.get_dynamic_rules()?;
    let live: HashSet<u32> = rules.iter().map(|rule| rule.id).collect();
    let deferred: HashSet<u32> = entries.iter().map(|entry| entry.id).collect();

    let mut restore: Vec<DnrRule> = rules
        .iter()
        .filter(|rule| !rule.is_active() && !deferred.contains(&rule.id))
        .map(|rule| DnrRule::new(rule.id, rule.pattern(), true, settings))
        .collect();

    let mut remaining = Vec::with_capacity(entries.len());
    for entry in &entries {
        if !live.contains(&entry.id) {
            continue;
        }
        if !entry.is_expired(now) {
            remaining.push(entry.clone());
            continue;
        }
        let still_inactive = rules
            .iter()
            .any(|rule| rule.id == entry.id && !rule.is_active());
        if still_inactive {
            restore.push(DnrRule::new(entry.id, entry.url_to_block.as_str(), true, settings));
        }
    }

    let reactivated: Vec<u32> = restore.iter().map(|rule| rule.id).collect();
    if !restore.is_empty() {
        if let Err(e) = engine.update_dynamic_rules(&reactivated, restore) {
            error!("failed to reactivate rules {:?}: {}", reactivated, e);
            return Err(e.into());
        }
        info!("reactivated {} rule(s): {:?}", reactivated.len(), reactivated);
    }

    if remaining.len() != entries.len() {
        save_deferred(store, &remaining)?;
    }

    Ok(Reconciled {
        reactivated,
        pending: remaining.len(),
    })
}
