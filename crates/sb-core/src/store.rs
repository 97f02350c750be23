//! Rule store reconciler
//!
//! Keeps the host engine's rule set free of duplicate patterns across add,
//! bulk edit and delete. Duplicate detection is a map keyed by canonical
//! pattern, built from the rules the engine currently holds.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use rand::Rng;

use crate::config::Settings;
use crate::error::{BlockerError, Result};
use crate::host::RuleEngine;
use crate::pattern::url_to_pattern;
use crate::types::{DnrRule, RuleEdit, Site};

/// Largest rule id handed out. Ids are drawn from `1..=MAX_RULE_ID`.
pub const MAX_RULE_ID: u32 = 999;

/// Result of a block request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(Site),
    Duplicate,
}

/// Current rules in display form.
pub fn get_rules(engine: &impl RuleEngine) -> Result<Vec<Site>> {
    Ok(engine.get_dynamic_rules()?.iter().map(Site::from).collect())
}

// =============================================================================
// Add
// =============================================================================

/// Block `url`, unless a rule with the same canonical pattern exists.
pub fn add_rule<R: Rng + ?Sized>(
    engine: &mut impl RuleEngine,
    url: &str,
    block_domain: bool,
    settings: &Settings,
    rng: &mut R,
) -> Result<AddOutcome> {
    let pattern = url_to_pattern(url, block_domain, settings)?;
    let existing = engine.get_dynamic_rules()?;

    if existing.iter().any(|rule| rule.pattern() == pattern) {
        debug!("pattern {} is already blocked", pattern);
        return Ok(AddOutcome::Duplicate);
    }

    let id = allocate_id(&existing, rng)?;
    let rule = DnrRule::new(id, pattern, true, settings);
    let site = Site::from(&rule);
    engine.update_dynamic_rules(&[], vec![rule])?;

    info!("added rule {} for {}", id, site.stripped_url);
    Ok(AddOutcome::Added(site))
}

/// Draw random ids until one is not taken.
fn allocate_id<R: Rng + ?Sized>(existing: &[DnrRule], rng: &mut R) -> Result<u32> {
    let taken: HashSet<u32> = existing
        .iter()
        .map(|rule| rule.id)
        .filter(|id| (1..=MAX_RULE_ID).contains(id))
        .collect();

    if taken.len() >= MAX_RULE_ID as usize {
        return Err(BlockerError::RuleLimitReached { max: MAX_RULE_ID });
    }

    loop {
        let id = rng.random_range(1..=MAX_RULE_ID);
        if !taken.contains(&id) {
            return Ok(id);
        }
    }
}

// =============================================================================
// Bulk Update
// =============================================================================

/// Accepted edits of a bulk update, computed before touching the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkPlan {
    /// Replacement rules for the accepted edits
    pub rules: Vec<DnrRule>,
    /// Edits dropped for colliding with another rule's pattern or naming an unknown id
    pub dropped: Vec<u32>,
    /// Accepted edits that switch a rule from active to inactive
    pub deactivated: Vec<u32>,
    /// Accepted edits that switch a rule from inactive to active
    pub activated: Vec<u32>,
}

impl BulkPlan {
    pub fn ids(&self) -> Vec<u32> {
        self.rules.iter().map(|rule| rule.id).collect()
    }
}

/// Work out which edits survive deduplication.
///
/// Every edit is translated first; one invalid URL rejects the batch. An
/// edit is kept if its new pattern is unowned or owned by the edited rule
/// itself. Patterns claimed by earlier edits in the batch count as owned.
pub fn plan_bulk_update(existing: &[DnrRule], edits: &[RuleEdit], settings: &Settings) -> Result<BulkPlan> {
    let translated = edits
        .iter()
        .map(|edit| url_to_pattern(&edit.url, edit.block_domain, settings).map(|pattern| (edit, pattern)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut owners: HashMap<&str, u32> = HashMap::with_capacity(existing.len() + edits.len());
    for rule in existing {
        owners.entry(rule.pattern()).or_insert(rule.id);
    }
    let by_id: HashMap<u32, &DnrRule> = existing.iter().map(|rule| (rule.id, rule)).collect();

    let mut plan = BulkPlan::default();
    let mut seen = HashSet::with_capacity(edits.len());

    for (edit, pattern) in &translated {
        let Some(current) = by_id.get(&edit.id) else {
            debug!("dropping edit for unknown rule {}", edit.id);
            plan.dropped.push(edit.id);
            continue;
        };
        if !seen.insert(edit.id) {
            debug!("dropping repeated edit for rule {}", edit.id);
            plan.dropped.push(edit.id);
            continue;
        }

        match owners.get(pattern.as_str()) {
            Some(&owner) if owner != edit.id => {
                debug!("dropping edit for rule {}: pattern {} belongs to rule {}", edit.id, pattern, owner);
                plan.dropped.push(edit.id);
                continue;
            }
            _ => {
                owners.insert(pattern.as_str(), edit.id);
            }
        }

        if current.is_active() && !edit.is_active {
            plan.deactivated.push(edit.id);
        } else if !current.is_active() && edit.is_active {
            plan.activated.push(edit.id);
        }
        plan.rules.push(DnrRule::new(edit.id, pattern.clone(), edit.is_active, settings));
    }

    Ok(plan)
}

/// Replace the planned rules in one engine update.
pub fn apply_bulk_plan(engine: &mut impl RuleEngine, plan: &BulkPlan) -> Result<()> {
    if plan.rules.is_empty() {
        return Ok(());
    }
    engine.update_dynamic_rules(&plan.ids(), plan.rules.clone())?;
    info!("updated {} rule(s), dropped {}", plan.rules.len(), plan.dropped.len());
    Ok(())
}

// =============================================================================
// Delete
// =============================================================================

pub fn delete_rule(engine: &mut impl RuleEngine, id: u32) -> Result<()> {
    let existing = engine.get_dynamic_rules()?;
    if !existing.iter().any(|rule| rule.id == id) {
        return Err(BlockerError::UnknownRule(id));
    }
    engine.update_dynamic_rules(&[id], Vec::new())?;
    info!("deleted rule {}", id);
    Ok(())
}

/// Remove every rule. Returns the removed ids.
pub fn delete_all(engine: &mut impl RuleEngine) -> Result<Vec<u32>> {
    let ids: Vec<u32> = engine.get_dynamic_rules()?.iter().map(|rule| rule.id).collect();
    if !ids.is_empty() {
        engine.update_dynamic_rules(&ids, Vec::new())?;
    }
    info!("deleted all {} rule(s)", ids.len());
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HostError, InvalidUrl};
    use crate::host::MemoryRuleEngine;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn edit(id: u32, url: &str, block_domain: bool, is_active: bool) -> RuleEdit {
        RuleEdit {
            id,
            url: url.to_string(),
            block_domain,
            is_active,
        }
    }

    fn engine_with(sites: &[(u32, &str)]) -> MemoryRuleEngine {
        let settings = Settings::default();
        MemoryRuleEngine::with_rules(sites.iter().map(|(id, host)| {
            DnrRule::new(*id, url_to_pattern(host, true, &settings).unwrap(), true, &settings)
        }))
    }

    #[test]
    fn test_add_then_duplicate() {
        let settings = Settings::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut engine = MemoryRuleEngine::new();

        let first = add_rule(&mut engine, "https://example.com", true, &settings, &mut rng).unwrap();
        let AddOutcome::Added(site) = first else { panic!("expected added") };
        assert!((1..=MAX_RULE_ID).contains(&site.id));
        assert_eq!(site.stripped_url, "example.com");

        let second = add_rule(&mut engine, "example.com/", true, &settings, &mut rng).unwrap();
        assert_eq!(second, AddOutcome::Duplicate);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_same_host_different_scope_is_not_duplicate() {
        let settings = Settings::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut engine = MemoryRuleEngine::new();

        add_rule(&mut engine, "example.com", true, &settings, &mut rng).unwrap();
        let outcome = add_rule(&mut engine, "example.com", false, &settings, &mut rng).unwrap();
        assert!(matches!(outcome, AddOutcome::Added(_)));
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn test_add_invalid_url_leaves_engine_untouched() {
        let settings = Settings::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut engine = MemoryRuleEngine::new();

        let err = add_rule(&mut engine, "ab", true, &settings, &mut rng).unwrap_err();
        assert_eq!(err, BlockerError::InvalidInput(InvalidUrl::TooShort { min: 4 }));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_add_reports_engine_failure() {
        let settings = Settings::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut engine = MemoryRuleEngine::new();
        engine.reject_updates(Some("quota".to_string()));

        let err = add_rule(&mut engine, "example.com", true, &settings, &mut rng).unwrap_err();
        assert_eq!(err, BlockerError::Host(HostError::RuleEngine("quota".to_string())));
    }

    #[test]
    fn test_allocate_id_avoids_taken_ids() {
        let settings = Settings::default();
        let existing: Vec<DnrRule> = (1..MAX_RULE_ID)
            .map(|id| DnrRule::new(id, format!("^https?://h{}\\.com/?$", id), true, &settings))
            .collect();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(allocate_id(&existing, &mut rng).unwrap(), MAX_RULE_ID);
    }

    #[test]
    fn test_allocate_id_limit() {
        let settings = Settings::default();
        let existing: Vec<DnrRule> = (1..=MAX_RULE_ID)
            .map(|id| DnrRule::new(id, format!("^https?://h{}\\.com/?$", id), true, &settings))
            .collect();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            allocate_id(&existing, &mut rng).unwrap_err(),
            BlockerError::RuleLimitReached { max: MAX_RULE_ID }
        );
    }

    #[test]
    fn test_bulk_update_drops_collision_with_other_rule() {
        let settings = Settings::default();
        let mut engine = engine_with(&[(1, "a.com"), (2, "b.com")]);
        let existing = engine.get_dynamic_rules().unwrap();

        let plan = plan_bulk_update(&existing, &[edit(2, "a.com", true, true)], &settings).unwrap();
        assert!(plan.rules.is_empty());
        assert_eq!(plan.dropped, vec![2]);

        apply_bulk_plan(&mut engine, &plan).unwrap();
        let sites = get_rules(&engine).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[1].stripped_url, "b.com");
    }

    #[test]
    fn test_bulk_update_self_collision_is_kept() {
        let settings = Settings::default();
        let mut engine = engine_with(&[(1, "a.com")]);
        let existing = engine.get_dynamic_rules().unwrap();

        let plan = plan_bulk_update(&existing, &[edit(1, "a.com", true, false)], &settings).unwrap();
        assert_eq!(plan.ids(), vec![1]);
        assert_eq!(plan.deactivated, vec![1]);

        apply_bulk_plan(&mut engine, &plan).unwrap();
        assert!(!get_rules(&engine).unwrap()[0].is_active);
    }

    #[test]
    fn test_bulk_update_two_edits_claiming_same_pattern() {
        let settings = Settings::default();
        let engine = engine_with(&[(1, "a.com"), (2, "b.com")]);
        let existing = engine.get_dynamic_rules().unwrap();

        let plan = plan_bulk_update(
            &existing,
            &[edit(1, "c.com", true, true), edit(2, "c.com", true, true)],
            &settings,
        )
        .unwrap();
        assert_eq!(plan.ids(), vec![1]);
        assert_eq!(plan.dropped, vec![2]);
    }

    #[test]
    fn test_bulk_update_unknown_id_dropped() {
        let settings = Settings::default();
        let engine = engine_with(&[(1, "a.com")]);
        let existing = engine.get_dynamic_rules().unwrap();

        let plan = plan_bulk_update(&existing, &[edit(5, "z.com", true, true)], &settings).unwrap();
        assert!(plan.rules.is_empty());
        assert_eq!(plan.dropped, vec![5]);
    }

    #[test]
    fn test_bulk_update_invalid_url_rejects_batch() {
        let settings = Settings::default();
        let engine = engine_with(&[(1, "a.com"), (2, "b.com")]);
        let existing = engine.get_dynamic_rules().unwrap();

        let err = plan_bulk_update(
            &existing,
            &[edit(1, "c.com", true, true), edit(2, "chrome-extension://x/options.html", true, true)],
            &settings,
        )
        .unwrap_err();
        assert!(matches!(err, BlockerError::InvalidInput(InvalidUrl::Forbidden(_))));
    }

    #[test]
    fn test_bulk_update_tracks_activation() {
        let settings = Settings::default();
        let existing = vec![
            DnrRule::new(1, "^https?://a\\.com/?.*", false, &settings),
            DnrRule::new(2, "^https?://b\\.com/?.*", true, &settings),
        ];

        let plan = plan_bulk_update(
            &existing,
            &[edit(1, "a.com", true, true), edit(2, "b.com", false, true)],
            &settings,
        )
        .unwrap();
        assert_eq!(plan.activated, vec![1]);
        assert!(plan.deactivated.is_empty());
        assert_eq!(plan.rules[1].pattern(), "^https?://b\\.com/?$");
    }

    #[test]
    fn test_delete() {
        let mut engine = engine_with(&[(1, "a.com"), (2, "b.com"), (3, "c.com")]);

        delete_rule(&mut engine, 2).unwrap();
        assert_eq!(engine.len(), 2);
        assert_eq!(delete_rule(&mut engine, 2).unwrap_err(), BlockerError::UnknownRule(2));

        assert_eq!(delete_all(&mut engine).unwrap(), vec![1, 3]);
        assert!(engine.is_empty());
        assert!(delete_all(&mut engine).unwrap().is_empty());
    }
}
