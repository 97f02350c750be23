//! Daily disable quota
//!
//! While strict mode is on, only a few rules may be switched off per
//! calendar day. The counter is refilled the first time it is read on a day
//! later than the stored reset date.

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{BlockerError, HostError, Result};
use crate::host::{self, KeyValueStore, DISABLE_QUOTA_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableQuota {
    pub remaining: u32,
    pub last_reset: NaiveDate,
}

impl DisableQuota {
    pub fn fresh(today: NaiveDate, limit: u32) -> Self {
        Self {
            remaining: limit,
            last_reset: today,
        }
    }

    /// Refill when the stored date lies before `today`.
    pub fn refreshed(self, today: NaiveDate, limit: u32) -> Self {
        if self.last_reset < today {
            debug!("disable quota reset to {} for {}", limit, today);
            Self::fresh(today, limit)
        } else {
            self
        }
    }

    pub fn check(&self, requested: u32) -> Result<()> {
        if requested > self.remaining {
            return Err(BlockerError::QuotaExceeded {
                requested,
                remaining: self.remaining,
            });
        }
        Ok(())
    }

    pub fn consume(&mut self, count: u32) -> Result<()> {
        self.check(count)?;
        self.remaining -= count;
        Ok(())
    }
}

/// Calendar day of `now` in the configured offset.
pub fn today(now: DateTime<Utc>, settings: &Settings) -> NaiveDate {
    now.with_timezone(&settings.day_offset()).date_naive()
}

/// Stored quota for `today`, refilled if the day rolled over.
///
/// A missing or unreadable record starts a fresh quota.
pub fn load_quota(store: &impl KeyValueStore, today: NaiveDate, settings: &Settings) -> Result<DisableQuota> {
    let limit = settings.daily_disable_limit;
    let stored = match host::load::<DisableQuota>(store, DISABLE_QUOTA_KEY) {
        Ok(stored) => stored,
        Err(HostError::Malformed { reason, .. }) => {
            warn!("ignoring malformed disable quota: {}", reason);
            None
        }
        Err(e) => return Err(e.into()),
    };
    Ok(stored
        .map(|quota| quota.refreshed(today, limit))
        .unwrap_or_else(|| DisableQuota::fresh(today, limit)))
}

/// Ensure `count` deactivations fit today's quota, without spending it.
pub fn check_quota(store: &impl KeyValueStore, today: NaiveDate, count: u32, settings: &Settings) -> Result<DisableQuota> {
    let quota = load_quota(store, today, settings)?;
    if let Err(e) = quota.check(count) {
        warn!("rejecting {} deactivation(s): {}", count, e);
        return Err(e);
    }
    Ok(quota)
}

/// Spend `count` deactivations and persist the counter.
pub fn consume_quota(
    store: &mut impl KeyValueStore,
    today: NaiveDate,
    count: u32,
    settings: &Settings,
) -> Result<DisableQuota> {
    let mut quota = load_quota(store, today, settings)?;
    quota.consume(count)?;
    host::save(store, DISABLE_QUOTA_KEY, &quota)?;
    Ok(quota)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStore;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_fourth_deactivation_rejected() {
        let settings = Settings::default();
        let mut store = MemoryStore::new();

        for left in [2, 1, 0] {
            let quota = consume_quota(&mut store, day(1), 1, &settings).unwrap();
            assert_eq!(quota.remaining, left);
        }

        let err = consume_quota(&mut store, day(1), 1, &settings).unwrap_err();
        assert_eq!(err, BlockerError::QuotaExceeded { requested: 1, remaining: 0 });
        assert_eq!(load_quota(&store, day(1), &settings).unwrap().remaining, 0);
    }

    #[test]
    fn test_resets_on_new_day() {
        let settings = Settings::default();
        let mut store = MemoryStore::new();
        consume_quota(&mut store, day(1), 3, &settings).unwrap();

        let quota = load_quota(&store, day(2), &settings).unwrap();
        assert_eq!(quota, DisableQuota::fresh(day(2), 3));
        assert_eq!(consume_quota(&mut store, day(2), 1, &settings).unwrap().remaining, 2);
    }

    #[test]
    fn test_batch_larger_than_remaining() {
        let settings = Settings::default();
        let mut store = MemoryStore::new();
        consume_quota(&mut store, day(1), 2, &settings).unwrap();

        let err = check_quota(&store, day(1), 2, &settings).unwrap_err();
        assert_eq!(err, BlockerError::QuotaExceeded { requested: 2, remaining: 1 });
    }

    #[test]
    fn test_malformed_record_starts_fresh() {
        let settings = Settings::default();
        let mut store = MemoryStore::new();
        store.set(DISABLE_QUOTA_KEY, json!({"remaining": "lots"})).unwrap();

        assert_eq!(load_quota(&store, day(1), &settings).unwrap().remaining, 3);
    }

    #[test]
    fn test_today_uses_offset() {
        let mut settings = Settings::default();
        let now = DateTime::parse_from_rfc3339("2024-03-01T23:30:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(today(now, &settings), day(1));

        settings.utc_offset_minutes = 60;
        assert_eq!(today(now, &settings), day(2));
    }

    #[test]
    fn test_stored_format() {
        let quota = DisableQuota::fresh(day(5), 3);
        assert_eq!(
            serde_json::to_value(quota).unwrap(),
            json!({"remaining": 3, "lastReset": "2024-03-05"})
        );
    }
}
