//! Background message handler
//!
//! Owns the host APIs and processes one [`Action`] at a time to completion.
//! Every failure becomes a failure [`Response`]; nothing here panics or
//! retries.

use chrono::{DateTime, Utc};
use log::{error, warn};
use rand::rngs::StdRng;
use serde_json::Value;

use crate::config::Settings;
use crate::error::{BlockerError, Result};
use crate::host::{Clock, KeyValueStore, RuleEngine, TabQuery, DISABLE_QUOTA_KEY, INACTIVE_RULES_KEY};
use crate::matcher::{MatchResult, Matcher};
use crate::messages::{Action, Response, Status};
use crate::pattern::truncate_url;
use crate::quota::{self, DisableQuota};
use crate::store::{self, AddOutcome, BulkPlan};
use crate::strict;
use crate::types::{RuleEdit, Site};

/// What a navigation event caused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationOutcome {
    /// Rules strict mode switched back on
    pub reactivated: Vec<u32>,
    /// Redirect for the tab, if its new URL is blocked
    pub redirect: Option<MatchResult>,
}

pub struct Background<E, S, T, C> {
    pub engine: E,
    pub storage: S,
    pub tabs: T,
    pub clock: C,
    settings: Settings,
    rng: StdRng,
}

impl<E, S, T, C> Background<E, S, T, C>
where
    E: RuleEngine,
    S: KeyValueStore,
    T: TabQuery,
    C: Clock,
{
    pub fn new(engine: E, storage: S, tabs: T, clock: C, settings: Settings, rng: StdRng) -> Self {
        Self {
            engine,
            storage,
            tabs,
            clock,
            settings,
            rng,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Process one message.
    pub fn handle(&mut self, action: Action) -> Response {
        match self.dispatch(action) {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    BlockerError::Host(_) | BlockerError::RuleLimitReached { .. } => error!("{}", e),
                    _ => warn!("{}", e),
                }
                Response::failure(&e)
            }
        }
    }

    fn dispatch(&mut self, action: Action) -> Result<Response> {
        match action {
            Action::BlockUrl { url, block_domain } => match self.block_url(&url, block_domain)? {
                AddOutcome::Added(site) => {
                    let mut res = Response::ok(Status::Added, "URL has been saved");
                    res.id = Some(site.id);
                    Ok(res)
                }
                AddOutcome::Duplicate => Ok(Response::ok(Status::Duplicate, "URL is already blocked")),
            },
            Action::DeleteRule { delete_rule_id } => {
                self.delete_rule(delete_rule_id)?;
                Ok(Response::ok(
                    Status::DeletedRule,
                    format!("Rule {} has been deleted", delete_rule_id),
                ))
            }
            Action::DeleteAll => {
                self.delete_all()?;
                Ok(Response::ok(Status::Deleted, "All rules have been deleted"))
            }
            Action::GetRules => {
                let rules = self.rules()?;
                Ok(Response::ok(Status::GetRules, format!("{} rule(s)", rules.len())).with_rules(rules))
            }
            Action::UpdateRules { updated_rules } => {
                let (plan, rules) = self.update_rules(&updated_rules)?;
                let mut res = Response::ok(Status::Updated, "Rules updated").with_rules(rules);
                res.dropped = Some(plan.dropped);
                Ok(res)
            }
            Action::GetCurrentUrl => {
                let url = self.current_url()?;
                let mut res = Response::ok(Status::CurrUrl, "Current URL");
                res.url = Some(url);
                Ok(res)
            }
            Action::SetStrictMode { enabled } => {
                let deferred = self.set_strict_mode(enabled)?;
                let mut res = Response::ok(
                    Status::StrictMode,
                    format!(
                        "Strict mode {} ({} rule(s) deferred)",
                        if enabled { "enabled" } else { "disabled" },
                        deferred
                    ),
                );
                res.strict_mode = Some(enabled);
                Ok(res)
            }
            Action::GetStrictMode => {
                let mut res = Response::ok(Status::StrictMode, "Strict mode state");
                res.strict_mode = Some(strict::is_enabled(&self.storage)?);
                Ok(res)
            }
            Action::GetDisableQuota => {
                let quota = self.disable_quota()?;
                let mut res = Response::ok(
                    Status::DisableQuota,
                    format!("{} deactivation(s) left today", quota.remaining),
                );
                res.remaining = Some(quota.remaining);
                Ok(res)
            }
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub fn block_url(&mut self, url: &str, block_domain: bool) -> Result<AddOutcome> {
        store::add_rule(&mut self.engine, url, block_domain, &self.settings, &mut self.rng)
    }

    pub fn rules(&self) -> Result<Vec<Site>> {
        store::get_rules(&self.engine)
    }

    /// Apply edited rows. Returns the applied plan and the refreshed rules.
    ///
    /// Under strict mode the quota is spent and the deferred list written
    /// before the engine is touched. If the engine then rejects the update,
    /// both storage values are put back, so a failed call changes nothing.
    pub fn update_rules(&mut self, edits: &[RuleEdit]) -> Result<(BulkPlan, Vec<Site>)> {
        let existing = self.engine.get_dynamic_rules()?;
        let plan = store::plan_bulk_update(&existing, edits, &self.settings)?;

        if !strict::is_enabled(&self.storage)? {
            store::apply_bulk_plan(&mut self.engine, &plan)?;
            let rules = self.rules()?;
            return Ok((plan, rules));
        }

        let now = self.clock.now();
        let today = quota::today(now, &self.settings);
        let deactivations = plan.deactivated.len() as u32;

        if deactivations > 0 {
            quota::check_quota(&self.storage, today, deactivations, &self.settings)?;
        }

        let saved = self.stored_values(&[DISABLE_QUOTA_KEY, INACTIVE_RULES_KEY])?;
        let applied = self
            .record_strict_update(&plan, now, deactivations)
            .and_then(|()| store::apply_bulk_plan(&mut self.engine, &plan));
        if let Err(e) = applied {
            self.restore_values(saved);
            return Err(e);
        }

        let rules = self.rules()?;
        Ok((plan, rules))
    }

    fn record_strict_update(&mut self, plan: &BulkPlan, now: DateTime<Utc>, deactivations: u32) -> Result<()> {
        if deactivations > 0 {
            let today = quota::today(now, &self.settings);
            quota::consume_quota(&mut self.storage, today, deactivations, &self.settings)?;
        }
        strict::record_changes(&mut self.storage, plan, now, &self.settings)
    }

    fn stored_values(&self, keys: &[&'static str]) -> Result<Vec<(&'static str, Value)>> {
        keys.iter()
            .map(|key| -> Result<(&'static str, Value)> {
                Ok((*key, self.storage.get(key)?.unwrap_or(Value::Null)))
            })
            .collect()
    }

    /// Best-effort write-back after a failed update. Failures are logged.
    fn restore_values(&mut self, saved: Vec<(&'static str, Value)>) {
        for (key, value) in saved {
            if let Err(e) = self.storage.set(key, value) {
                error!("could not restore '{}' after failed update: {}", key, e);
            }
        }
    }

    pub fn delete_rule(&mut self, id: u32) -> Result<()> {
        store::delete_rule(&mut self.engine, id)?;
        strict::forget(&mut self.storage, &[id])
    }

    pub fn delete_all(&mut self) -> Result<()> {
        let ids = store::delete_all(&mut self.engine)?;
        strict::forget(&mut self.storage, &ids)
    }

    /// Focused tab URL cut to one below the maximum URL length.
    pub fn current_url(&self) -> Result<String> {
        let url = self.tabs.active_tab_url()?.unwrap_or_default();
        let max = self.settings.max_url_length.saturating_sub(1);
        Ok(truncate_url(&url, max).to_string())
    }

    pub fn set_strict_mode(&mut self, enabled: bool) -> Result<usize> {
        let now = self.clock.now();
        strict::set_strict_mode(&self.engine, &mut self.storage, enabled, now, &self.settings)
    }

    pub fn disable_quota(&self) -> Result<DisableQuota> {
        let today = quota::today(self.clock.now(), &self.settings);
        quota::load_quota(&self.storage, today, &self.settings)
    }

    /// Run on navigation completion or a URL change inside a tab.
    ///
    /// Reconciles strict mode, then checks `changed_url` against the active
    /// rules. A failed reconciliation is logged and does not stop the check.
    pub fn on_navigation(&mut self, changed_url: Option<&str>) -> Result<NavigationOutcome> {
        let now = self.clock.now();
        let reactivated = match strict::reconcile(&mut self.engine, &mut self.storage, now, &self.settings) {
            Ok(reconciled) => reconciled.reactivated,
            Err(e) => {
                error!("strict mode reconciliation failed: {}", e);
                Vec::new()
            }
        };

        let redirect = match changed_url {
            Some(url) => {
                let rules = self.engine.get_dynamic_rules()?;
                Matcher::new(&rules).redirect_for(url, &self.settings)
            }
            None => None,
        };

        Ok(NavigationOutcome { reactivated, redirect })
    }
}
