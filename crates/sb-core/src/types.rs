//! Core type definitions for SiteBlock
//!
//! The declarative rule types mirror the host browser's rule engine wire
//! format, so they serialize exactly as the engine expects them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::pattern::{is_domain_pattern, strip_pattern};

/// Priority given to every rule. All rules are equal; ids keep them apart.
pub const RULE_PRIORITY: u32 = 1;

// =============================================================================
// Rule Actions
// =============================================================================

/// What the host engine does with a navigation matching a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleActionType {
    /// Send the navigation to the blocked page
    Redirect,
    /// No-op rule kept for an inactive site
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    pub regex_substitution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: RuleActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
}

// =============================================================================
// Resource Types
// =============================================================================

/// Request types a rule condition can be limited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    Xmlhttprequest,
    Ping,
    CspReport,
    Media,
    Websocket,
    #[serde(other)]
    Other,
}

// =============================================================================
// Declarative Rule
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub regex_filter: String,
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
}

/// A rule as stored by the host's declarative rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnrRule {
    pub id: u32,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

fn default_priority() -> u32 {
    RULE_PRIORITY
}

impl DnrRule {
    /// Build a top-level navigation rule for `pattern`.
    ///
    /// Active rules redirect to the blocked page, inactive ones are `allow`
    /// rules that keep the site listed without blocking it.
    pub fn new(id: u32, pattern: impl Into<String>, active: bool, settings: &Settings) -> Self {
        let action = if active {
            RuleAction {
                action_type: RuleActionType::Redirect,
                redirect: Some(Redirect {
                    regex_substitution: settings.blocked_page_for(id),
                }),
            }
        } else {
            RuleAction {
                action_type: RuleActionType::Allow,
                redirect: None,
            }
        };

        Self {
            id,
            priority: RULE_PRIORITY,
            action,
            condition: RuleCondition {
                regex_filter: pattern.into(),
                resource_types: vec![ResourceType::MainFrame],
            },
        }
    }

    #[inline]
    pub fn pattern(&self) -> &str {
        &self.condition.regex_filter
    }

    /// A rule blocks only while it carries a redirect.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.action.redirect.is_some()
    }
}

// =============================================================================
// Display View
// =============================================================================

/// A rule as presented to the popup and options pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: u32,
    /// Canonical pattern
    pub url: String,
    /// Pattern with the fixed tokens removed, as the user typed it
    pub stripped_url: String,
    pub block_domain: bool,
    pub is_active: bool,
}

impl From<&DnrRule> for Site {
    fn from(rule: &DnrRule) -> Self {
        Self {
            id: rule.id,
            url: rule.pattern().to_string(),
            stripped_url: strip_pattern(rule.pattern()),
            block_domain: is_domain_pattern(rule.pattern()),
            is_active: rule.is_active(),
        }
    }
}

/// An edited row submitted from the options page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEdit {
    pub id: u32,
    /// User-entered URL, not yet canonical
    pub url: String,
    pub block_domain: bool,
    pub is_active: bool,
}

// =============================================================================
// Strict Mode Records
// =============================================================================

/// A rule disabled under strict mode, waiting to be forced back on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredEntry {
    pub id: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub unblock_date: DateTime<Utc>,
    /// Pattern restored when the entry expires
    pub url_to_block: String,
}

impl DeferredEntry {
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.unblock_date < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_rule_wire_format() {
        let rule = DnrRule::new(7, "^https?://example\\.com/?.*", true, &Settings::default());
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 7,
                "priority": 1,
                "action": {
                    "type": "redirect",
                    "redirect": { "regexSubstitution": "/blocked.html?id=7" }
                },
                "condition": {
                    "regexFilter": "^https?://example\\.com/?.*",
                    "resourceTypes": ["main_frame"]
                }
            })
        );
    }

    #[test]
    fn test_inactive_rule_has_no_redirect() {
        let rule = DnrRule::new(7, "^https?://example\\.com/?$", false, &Settings::default());
        assert!(!rule.is_active());
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["action"], serde_json::json!({ "type": "allow" }));
    }

    #[test]
    fn test_site_view() {
        let pattern = crate::pattern::pattern_for_host("news.ycombinator.com", true);
        let rule = DnrRule::new(3, pattern, true, &Settings::default());
        let site = Site::from(&rule);
        assert_eq!(site.stripped_url, "news.ycombinator.com");
        assert!(site.block_domain);
        assert!(site.is_active);

        let legacy = DnrRule::new(4, "^https?://news\\.ycombinator\\.com/?.*", false, &Settings::default());
        let site = Site::from(&legacy);
        assert_eq!(site.stripped_url, "news.ycombinator.com");
        assert!(site.block_domain);
        assert!(!site.is_active);
    }

    #[test]
    fn test_deferred_entry_millis() {
        let entry: DeferredEntry = serde_json::from_str(
            r#"{"id": 5, "unblockDate": 1700000000000, "urlToBlock": "^https?://a\\.com/?$"}"#,
        )
        .unwrap();
        assert_eq!(entry.unblock_date.timestamp_millis(), 1_700_000_000_000);
        assert!(entry.is_expired(entry.unblock_date + chrono::Duration::milliseconds(1)));
        assert!(!entry.is_expired(entry.unblock_date));
    }

    #[test]
    fn test_unknown_resource_type() {
        let ty: ResourceType = serde_json::from_str("\"webtransport\"").unwrap();
        assert_eq!(ty, ResourceType::Other);
    }
}
