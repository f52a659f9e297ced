//! Quota scheduling: the decaying daily limit and calendar-day rollover.
//!
//! A [`QuotaScheduler`] owns the decay parameters and the UTC offset that
//! defines "today". Rollover is evaluated lazily: every path that reads or
//! writes a [`QuotaRecord`] calls [`QuotaScheduler::rebase_if_stale`] first,
//! and a daily tick calls [`QuotaScheduler::rebase_all`].

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{QuotaMap, QuotaRecord};

/// Milliseconds in one day-index step.
pub const DAY_MS: i64 = 86_400_000;

/// Parameters of the decay curve, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayPolicy {
    pub initial_minutes: u32,
    pub decay_per_day: u32,
    pub floor_minutes: u32,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            initial_minutes: 60,
            decay_per_day: 10,
            floor_minutes: 5,
        }
    }
}

impl DecayPolicy {
    /// `max(floor, initial - decay * days)`.
    pub fn limit_for_day(&self, days: u32) -> f64 {
        let decayed =
            i64::from(self.initial_minutes) - i64::from(self.decay_per_day) * i64::from(days);
        decayed.max(i64::from(self.floor_minutes)) as f64
    }

    /// Whole days elapsed since `start`, clamped at zero.
    pub fn days_since(start: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
        let elapsed = (now - start).num_milliseconds();
        if elapsed <= 0 {
            return 0;
        }
        u32::try_from(elapsed / DAY_MS).unwrap_or(u32::MAX)
    }

    /// The limit a record started at `start` should have at `now`.
    pub fn limit_at(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        self.limit_for_day(Self::days_since(start, now))
    }

    /// Tomorrow's limit given today's.
    pub fn next_limit(&self, current: f64) -> f64 {
        (current - f64::from(self.decay_per_day)).max(f64::from(self.floor_minutes))
    }

    /// Days needed to go from the initial allowance to the floor.
    pub fn days_to_floor(&self) -> Option<f64> {
        if self.decay_per_day == 0 {
            return None;
        }
        let span = f64::from(self.initial_minutes.saturating_sub(self.floor_minutes));
        Some(span / f64::from(self.decay_per_day))
    }

    /// Detox progress in percent after `days` full days, capped at 100.
    pub fn progress_percent(&self, days: u32) -> f64 {
        match self.days_to_floor() {
            Some(total) if total > 0.0 => (f64::from(days) / total * 100.0).min(100.0),
            _ => 100.0,
        }
    }
}

/// Decides staleness and performs rebases against a fixed day boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaScheduler {
    policy: DecayPolicy,
    offset: FixedOffset,
}

impl QuotaScheduler {
    pub fn new(policy: DecayPolicy, offset: FixedOffset) -> Self {
        Self { policy, offset }
    }

    /// Scheduler using the machine's current local offset.
    pub fn local(policy: DecayPolicy) -> Self {
        Self::new(policy, Local::now().offset().fix())
    }

    pub fn policy(&self) -> &DecayPolicy {
        &self.policy
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn calendar_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// `YYYY-MM-DD` key for the lockout counter.
    pub fn date_key(&self, at: DateTime<Utc>) -> String {
        self.calendar_date(at).format("%Y-%m-%d").to_string()
    }

    pub fn is_stale(&self, record: &QuotaRecord, now: DateTime<Utc>) -> bool {
        self.calendar_date(record.last_reset()) != self.calendar_date(now)
    }

    /// Rebase `record` if its last reset falls on another calendar day.
    /// Returns whether anything changed.
    pub fn rebase_if_stale(&self, record: &mut QuotaRecord, now: DateTime<Utc>) -> bool {
        if !self.is_stale(record, now) {
            return false;
        }
        let limit = self.policy.limit_at(record.start_date(), now);
        tracing::debug!(
            from = record.daily_limit(),
            to = limit,
            "rebasing quota record for a new day"
        );
        record.rebase(limit, now);
        true
    }

    /// Rebase every stale record. Returns the number rebased.
    pub fn rebase_all(&self, records: &mut QuotaMap, now: DateTime<Utc>) -> usize {
        records
            .values_mut()
            .filter_map(|rec| self.rebase_if_stale(rec, now).then_some(()))
            .count()
    }

    /// Start of the next calendar day.
    pub fn next_midnight(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.calendar_date(now)
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .and_then(|naive| self.offset.from_local_datetime(&naive).single())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| now + Duration::days(1))
    }

    /// Whole hours (rounded up) until the next reset.
    pub fn hours_until_reset(&self, now: DateTime<Utc>) -> i64 {
        let minutes = (self.next_midnight(now) - now).num_minutes();
        (minutes + 59) / 60
    }

    /// Days spent in detox, counting the start day as day 1.
    pub fn detox_day(&self, record: &QuotaRecord, now: DateTime<Utc>) -> u32 {
        DecayPolicy::days_since(record.start_date(), now).saturating_add(1)
    }
}
