use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quota::DecayPolicy;

/// Daily time budget for one detox domain. All quantities are minutes.
///
/// `remaining_time` is derived: it is recomputed from `daily_limit` and
/// `used_time_today` on every mutation (and on deserialization) and can
/// never be set on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawQuotaRecord")]
pub struct QuotaRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    start_date: DateTime<Utc>,
    daily_limit: f64,
    used_time_today: f64,
    remaining_time: f64,
    total_used_time: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    last_reset: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    last_update: DateTime<Utc>,
}

/// Persisted shape. Stored `remainingTime` is ignored.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuotaRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    start_date: DateTime<Utc>,
    daily_limit: f64,
    #[serde(default)]
    used_time_today: f64,
    #[serde(default)]
    total_used_time: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    last_reset: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    last_update: Option<DateTime<Utc>>,
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

impl From<RawQuotaRecord> for QuotaRecord {
    fn from(raw: RawQuotaRecord) -> Self {
        let mut record = Self {
            start_date: raw.start_date,
            daily_limit: non_negative(raw.daily_limit),
            used_time_today: non_negative(raw.used_time_today),
            remaining_time: 0.0,
            total_used_time: non_negative(raw.total_used_time),
            last_reset: raw.last_reset,
            last_update: raw.last_update.unwrap_or(raw.last_reset),
        };
        record.recompute();
        record
    }
}

impl QuotaRecord {
    /// Fresh record for a domain entering detox at `now`: day 0, full allowance.
    pub fn new(policy: &DecayPolicy, now: DateTime<Utc>) -> Self {
        let limit = policy.limit_for_day(0);
        Self {
            start_date: now,
            daily_limit: limit,
            used_time_today: 0.0,
            remaining_time: limit,
            total_used_time: 0.0,
            last_reset: now,
            last_update: now,
        }
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn daily_limit(&self) -> f64 {
        self.daily_limit
    }

    pub fn used_time_today(&self) -> f64 {
        self.used_time_today
    }

    pub fn remaining_time(&self) -> f64 {
        self.remaining_time
    }

    pub fn total_used_time(&self) -> f64 {
        self.total_used_time
    }

    pub fn last_reset(&self) -> DateTime<Utc> {
        self.last_reset
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_time <= 0.0
    }

    /// Accumulate `minutes` of use. Non-positive (or non-finite) amounts are
    /// ignored and `false` is returned.
    pub fn add_usage(&mut self, minutes: f64, now: DateTime<Utc>) -> bool {
        if !(minutes.is_finite() && minutes > 0.0) {
            return false;
        }
        self.used_time_today += minutes;
        self.total_used_time += minutes;
        self.last_update = now;
        self.recompute();
        true
    }

    /// Start a new day with `limit` minutes.
    pub(crate) fn rebase(&mut self, limit: f64, now: DateTime<Utc>) {
        self.daily_limit = non_negative(limit);
        self.used_time_today = 0.0;
        self.last_reset = now;
        self.recompute();
    }

    /// Lift a limit that sits below the configured floor.
    pub(crate) fn enforce_floor(&mut self, floor: f64) -> bool {
        if self.daily_limit < floor {
            self.daily_limit = floor;
            self.recompute();
            true
        } else {
            false
        }
    }

    fn recompute(&mut self) {
        self.remaining_time = (self.daily_limit - self.used_time_today)
            .max(0.0)
            .min(self.daily_limit);
    }
}
