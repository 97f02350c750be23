//! Runtime settings shared by every SiteBlock front end.

use chrono::{Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_URL_LENGTH: usize = 4;
pub const DEFAULT_MAX_URL_LENGTH: usize = 500;
pub const DEFAULT_BLOCK_PERIOD_SECS: u64 = 60 * 60;
pub const DEFAULT_DAILY_DISABLE_LIMIT: u32 = 3;
pub const DEFAULT_BLOCKED_PAGE_URL: &str = "/blocked.html";

/// Extension-internal pages that can never be blocked.
pub const DEFAULT_FORBIDDEN_PREFIXES: &[&str] = &[
    "chrome-extension://",
    "moz-extension://",
    "safari-web-extension://",
];

/// Tunables for translation, strict mode and the disable quota.
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub min_url_length: usize,
    pub max_url_length: usize,
    pub forbidden_prefixes: Vec<String>,
    /// How long a rule disabled under strict mode stays disabled.
    pub block_period_secs: u64,
    pub daily_disable_limit: u32,
    /// Page the redirect rules send blocked navigations to.
    pub blocked_page_url: String,
    /// Offset used to decide where a calendar day starts for the quota.
    pub utc_offset_minutes: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_url_length: DEFAULT_MIN_URL_LENGTH,
            max_url_length: DEFAULT_MAX_URL_LENGTH,
            forbidden_prefixes: DEFAULT_FORBIDDEN_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            block_period_secs: DEFAULT_BLOCK_PERIOD_SECS,
            daily_disable_limit: DEFAULT_DAILY_DISABLE_LIMIT,
            blocked_page_url: DEFAULT_BLOCKED_PAGE_URL.to_string(),
            utc_offset_minutes: 0,
        }
    }
}

impl Settings {
    pub fn block_period(&self) -> Duration {
        i64::try_from(self.block_period_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// Timezone for quota day boundaries. Out-of-range offsets fall back to UTC.
    pub fn day_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Redirect target for a blocked navigation caught by rule `id`.
    pub fn blocked_page_for(&self, id: u32) -> String {
        format!("{}?id={}", self.blocked_page_url, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"dailyDisableLimit": 5, "blockedPageUrl": "chrome-extension://abc/blocked.html"}"#)
                .unwrap();
        assert_eq!(settings.daily_disable_limit, 5);
        assert_eq!(settings.min_url_length, DEFAULT_MIN_URL_LENGTH);
        assert_eq!(settings.block_period(), Duration::hours(1));
        assert_eq!(
            settings.blocked_page_for(42),
            "chrome-extension://abc/blocked.html?id=42"
        );
    }

    #[test]
    fn test_day_offset() {
        let mut settings = Settings::default();
        settings.utc_offset_minutes = 120;
        assert_eq!(settings.day_offset().local_minus_utc(), 7200);

        settings.utc_offset_minutes = 100_000;
        assert_eq!(settings.day_offset().local_minus_utc(), 0);
    }
}
