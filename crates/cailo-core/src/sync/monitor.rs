//! Page monitor: the per-page context.
//!
//! Holds a replica fetched once at load, renders its page's status from it
//! and reacts to pushes. A monitor never writes state. It sends back a
//! `report-block` each time it puts up a block view, and `limit-reached`
//! when its local countdown runs out.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::protocol::{Push, Request, StateReplica};
use crate::block::{evaluate, resolve_host, BlockReason, Verdict};
use crate::host::TabId;
use crate::model::Domain;
use crate::quota::QuotaScheduler;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutView {
    pub domain: Domain,
    pub used_minutes: f64,
    pub limit_minutes: f64,
    pub hours_until_reset: i64,
    pub tomorrow_limit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "kebab-case")]
pub enum PageView {
    /// Not restricted, or state not loaded yet.
    Normal,
    Countdown { domain: Domain, remaining_secs: u64 },
    Blocked { domain: Domain },
    Lockout(LockoutView),
}

#[derive(Debug)]
pub struct PageMonitor {
    tab: TabId,
    url: String,
    host: Option<String>,
    replica: Option<StateReplica>,
    view: PageView,
    reported: bool,
}

impl PageMonitor {
    pub fn new(tab: TabId, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            tab,
            host: resolve_host(&url),
            url,
            replica: None,
            view: PageView::Normal,
            reported: false,
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn view(&self) -> &PageView {
        &self.view
    }

    /// Sent once when the page loads.
    pub fn load_request(&self) -> Request {
        Request::GetState
    }

    /// Apply a full replica and re-render.
    pub fn on_state(&mut self, replica: StateReplica, now: DateTime<Utc>) -> Option<Request> {
        let quotas = replica.current_quotas(now);
        let verdict = evaluate(replica.enabled, &replica.rules, &quotas, &self.url);
        let scheduler = replica.scheduler();

        let view = match verdict {
            Verdict::Blocked {
                domain,
                reason: BlockReason::Hard,
            } => PageView::Blocked { domain },
            Verdict::Blocked {
                domain,
                reason: BlockReason::QuotaExhausted,
            } => {
                let (used, limit) = quotas
                    .get(&domain)
                    .map(|r| (r.used_time_today(), r.daily_limit()))
                    .unwrap_or_default();
                PageView::Lockout(lockout_view(&scheduler, domain, used, limit, now))
            }
            Verdict::Allowed => self
                .host
                .as_deref()
                .and_then(|h| {
                    replica
                        .rules
                        .iter()
                        .find(|r| r.detox_mode && r.name.matches_host(h))
                })
                .and_then(|rule| quotas.get(&rule.name).map(|rec| (rule.name.clone(), rec)))
                .map(|(domain, rec)| PageView::Countdown {
                    domain,
                    remaining_secs: minutes_to_secs(rec.remaining_time()),
                })
                .unwrap_or(PageView::Normal),
        };

        self.replica = Some(replica);
        self.show(view)
    }

    pub fn on_push(&mut self, push: &Push, now: DateTime<Utc>) -> Option<Request> {
        match push {
            Push::StateChanged(replica) => self.on_state(replica.clone(), now),
            Push::TimeRemaining {
                domain,
                remaining,
                limit,
                used,
            } if self.covers(domain) => {
                if *remaining <= 0.0 {
                    let view = self.lockout(domain.clone(), *used, *limit, now);
                    self.show(view)
                } else {
                    self.show(PageView::Countdown {
                        domain: domain.clone(),
                        remaining_secs: minutes_to_secs(*remaining),
                    })
                }
            }
            Push::QuotaExhausted {
                domain,
                daily_limit,
            } if self.covers(domain) => {
                let view = self.lockout(domain.clone(), *daily_limit, *daily_limit, now);
                self.show(view)
            }
            // A new day may have lifted a lockout.
            Push::DetoxReset { .. } => Some(Request::GetState),
            Push::TimeRemaining { .. } | Push::QuotaExhausted { .. } | Push::UsageDelta { .. } => None,
        }
    }

    /// Advance the local countdown by one second. At zero the page shows
    /// the lockout and asks the coordinator to settle the domain's usage.
    pub fn tick_second(&mut self, now: DateTime<Utc>) -> Vec<Request> {
        let PageView::Countdown {
            domain,
            remaining_secs,
        } = &mut self.view
        else {
            return Vec::new();
        };
        *remaining_secs = remaining_secs.saturating_sub(1);
        if *remaining_secs > 0 {
            return Vec::new();
        }
        let domain = domain.clone();
        // At zero the whole limit has been used.
        let (used, limit) = self
            .replica
            .as_ref()
            .and_then(|r| r.quota_records.get(&domain))
            .map(|rec| (rec.daily_limit(), rec.daily_limit()))
            .unwrap_or_default();
        let view = self.lockout(domain.clone(), used, limit, now);
        let mut requests = vec![Request::LimitReached { domain }];
        requests.extend(self.show(view));
        requests
    }

    fn covers(&self, domain: &Domain) -> bool {
        self.host.as_deref().is_some_and(|h| domain.matches_host(h))
    }

    fn lockout(&self, domain: Domain, used: f64, limit: f64, now: DateTime<Utc>) -> PageView {
        let scheduler = self
            .replica
            .as_ref()
            .map(StateReplica::scheduler)
            .unwrap_or_else(|| QuotaScheduler::local(Default::default()));
        PageView::Lockout(lockout_view(&scheduler, domain, used, limit, now))
    }

    /// Switch views; returns `report-block` when a block shows after the
    /// page was last unblocked.
    fn show(&mut self, view: PageView) -> Option<Request> {
        let blocked = match &view {
            PageView::Blocked { domain } => Some(domain.clone()),
            PageView::Lockout(lockout) => Some(lockout.domain.clone()),
            PageView::Normal | PageView::Countdown { .. } => None,
        };
        self.view = view;
        let Some(domain) = blocked else {
            self.reported = false;
            return None;
        };
        if self.reported {
            return None;
        }
        self.reported = true;
        Some(Request::ReportBlock {
            domain,
            url: self.url.clone(),
        })
    }
}

fn minutes_to_secs(minutes: f64) -> u64 {
    if minutes.is_finite() && minutes > 0.0 {
        (minutes * 60.0).round() as u64
    } else {
        0
    }
}

fn lockout_view(
    scheduler: &QuotaScheduler,
    domain: Domain,
    used: f64,
    limit: f64,
    now: DateTime<Utc>,
) -> LockoutView {
    LockoutView {
        domain,
        used_minutes: used,
        limit_minutes: limit,
        hours_until_reset: scheduler.hours_until_reset(now),
        tomorrow_limit: scheduler.policy().next_limit(limit),
    }
}
