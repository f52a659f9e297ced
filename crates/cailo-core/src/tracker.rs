//! Usage tracking: per-tab sessions and periodic flushes into quota records.
//!
//! Each tab is either idle (no entry) or tracking one detox domain. The
//! tracker never persists anything itself; it mutates the quota map it is
//! handed and reports every flush so the coordinator can persist and
//! broadcast.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::block::{matching_rule, resolve_host};
use crate::host::TabId;
use crate::model::{BlockRule, Domain, QuotaMap};
use crate::quota::QuotaScheduler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub tab: TabId,
    /// Domain of the matching rule, not the raw host.
    pub domain: Domain,
    pub started_at: DateTime<Utc>,
}

/// Result of converting a session's elapsed time into usage.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub tab: TabId,
    pub domain: Domain,
    pub minutes: f64,
    pub remaining: f64,
    pub daily_limit: f64,
    pub used_today: f64,
    /// This flush took the record from remaining > 0 to remaining <= 0.
    pub exhausted: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrackOutcome {
    pub flushes: Vec<FlushReport>,
    /// Set when a new session began.
    pub started: Option<(TabId, Domain)>,
}

/// The detox domain a URL should be tracked under, if any.
pub fn tracked_domain(rules: &[BlockRule], quotas: &QuotaMap, url: &str) -> Option<Domain> {
    let host = resolve_host(url)?;
    let rule = matching_rule(rules, &host)?;
    (rule.detox_mode && quotas.contains_key(&rule.name)).then(|| rule.name.clone())
}

#[derive(Debug)]
pub struct UsageTracker {
    sessions: HashMap<TabId, ActiveSession>,
    flush_threshold: Duration,
}

impl UsageTracker {
    pub fn new(flush_threshold: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            flush_threshold,
        }
    }

    pub fn session(&self, tab: TabId) -> Option<&ActiveSession> {
        self.sessions.get(&tab)
    }

    pub fn is_tracking(&self, tab: TabId) -> bool {
        self.sessions.contains_key(&tab)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Re-evaluate `tab`, whose content now resolves to `domain` (`None`
    /// when untracked).
    pub fn observe(
        &mut self,
        tab: TabId,
        domain: Option<&Domain>,
        quotas: &mut QuotaMap,
        scheduler: &QuotaScheduler,
        now: DateTime<Utc>,
    ) -> TrackOutcome {
        let mut outcome = TrackOutcome::default();

        if let Some(session) = self.sessions.get_mut(&tab) {
            if Some(&session.domain) == domain {
                if session.started_at > now {
                    // Clock went backwards; restart the interval.
                    session.started_at = now;
                } else if now - session.started_at >= self.flush_threshold {
                    outcome.flushes.extend(flush(session, quotas, scheduler, now));
                    session.started_at = now;
                }
                return outcome;
            }
        }

        outcome.flushes.extend(self.end(tab, quotas, scheduler, now));
        if let Some(domain) = domain {
            tracing::debug!(%tab, %domain, "session started");
            self.sessions.insert(
                tab,
                ActiveSession {
                    tab,
                    domain: domain.clone(),
                    started_at: now,
                },
            );
            outcome.started = Some((tab, domain.clone()));
        }
        outcome
    }

    /// Flush and discard the session of `tab`.
    pub fn end(
        &mut self,
        tab: TabId,
        quotas: &mut QuotaMap,
        scheduler: &QuotaScheduler,
        now: DateTime<Utc>,
    ) -> Option<FlushReport> {
        let session = self.sessions.remove(&tab)?;
        tracing::debug!(%tab, domain = %session.domain, "session ended");
        flush(&session, quotas, scheduler, now)
    }

    /// End every session except the one held by `keep`.
    pub fn end_others(
        &mut self,
        keep: Option<TabId>,
        quotas: &mut QuotaMap,
        scheduler: &QuotaScheduler,
        now: DateTime<Utc>,
    ) -> Vec<FlushReport> {
        let tabs: Vec<TabId> = self
            .sessions
            .keys()
            .copied()
            .filter(|t| Some(*t) != keep)
            .collect();
        tabs.into_iter()
            .filter_map(|tab| self.end(tab, quotas, scheduler, now))
            .collect()
    }

    /// Flush every session tracking `domain` without waiting for the
    /// threshold. The sessions stay open.
    pub fn flush_domain(
        &mut self,
        domain: &Domain,
        quotas: &mut QuotaMap,
        scheduler: &QuotaScheduler,
        now: DateTime<Utc>,
    ) -> Vec<FlushReport> {
        let mut reports = Vec::new();
        for session in self.sessions.values_mut().filter(|s| &s.domain == domain) {
            if session.started_at >= now {
                continue;
            }
            reports.extend(flush(session, quotas, scheduler, now));
            session.started_at = now;
        }
        reports
    }

    /// End every session tracking `domain`.
    pub fn end_domain(
        &mut self,
        domain: &Domain,
        quotas: &mut QuotaMap,
        scheduler: &QuotaScheduler,
        now: DateTime<Utc>,
    ) -> Vec<FlushReport> {
        let tabs: Vec<TabId> = self
            .sessions
            .values()
            .filter(|s| &s.domain == domain)
            .map(|s| s.tab)
            .collect();
        tabs.into_iter()
            .filter_map(|tab| self.end(tab, quotas, scheduler, now))
            .collect()
    }
}

fn flush(
    session: &ActiveSession,
    quotas: &mut QuotaMap,
    scheduler: &QuotaScheduler,
    now: DateTime<Utc>,
) -> Option<FlushReport> {
    let elapsed_ms = (now - session.started_at).num_milliseconds();
    if elapsed_ms <= 0 {
        return None;
    }
    let minutes = elapsed_ms as f64 / 60_000.0;
    let record = quotas.get_mut(&session.domain)?;
    scheduler.rebase_if_stale(record, now);
    let was_available = !record.is_exhausted();
    if !record.add_usage(minutes, now) {
        return None;
    }
    tracing::debug!(
        domain = %session.domain,
        minutes,
        remaining = record.remaining_time(),
        "flushed usage"
    );
    Some(FlushReport {
        tab: session.tab,
        domain: session.domain.clone(),
        minutes,
        remaining: record.remaining_time(),
        daily_limit: record.daily_limit(),
        used_today: record.used_time_today(),
        exhausted: was_available && record.is_exhausted(),
    })
}
