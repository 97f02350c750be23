//! Client-side navigation matching
//!
//! The host engine only sees real requests. Navigations that change a tab's
//! URL without a request (history API, fragment-style routers) are checked
//! here against the active rules instead.

use log::warn;
use regex::Regex;

use crate::config::Settings;
use crate::types::DnrRule;

/// Active rules compiled for matching.
pub struct Matcher {
    rules: Vec<(u32, Regex)>,
}

/// A navigation caught by a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub rule_id: u32,
    pub redirect_url: String,
}

impl Matcher {
    /// Compile every active rule. Patterns that fail to compile are skipped.
    pub fn new(rules: &[DnrRule]) -> Self {
        let rules = rules
            .iter()
            .filter(|rule| rule.is_active())
            .filter_map(|rule| match Regex::new(rule.pattern()) {
                Ok(re) => Some((rule.id, re)),
                Err(e) => {
                    warn!("skipping rule {} with invalid pattern: {}", rule.id, e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First active rule matching `url`, in rule order.
    pub fn match_url(&self, url: &str) -> Option<u32> {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(url))
            .map(|(id, _)| *id)
    }

    /// Where to send the tab if `url` is blocked.
    pub fn redirect_for(&self, url: &str, settings: &Settings) -> Option<MatchResult> {
        self.match_url(url).map(|rule_id| MatchResult {
            rule_id,
            redirect_url: settings.blocked_page_for(rule_id),
        })
    }
}
