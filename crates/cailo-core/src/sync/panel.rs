//! Control surface: the on-demand panel.
//!
//! Loads the full replica on open and turns user intent into `apply-edit`
//! requests. Input is validated here first; the coordinator validates again.
//! Usage pushes update a local display cache between full refreshes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::protocol::{Edit, EditRequest, Push, QuotaInfo, Request, Response, StateReplica};
use crate::error::{EditError, ValidationError};
use crate::model::{BlockMode, Category, Domain};
use crate::quota::DecayPolicy;

/// Below this many minutes the panel warns.
pub const LOW_TIME_MINUTES: f64 = 5.0;
const WARNING_MINUTES: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Normal,
    Warning,
    Critical,
}

impl Urgency {
    pub fn for_remaining(minutes: f64) -> Self {
        if minutes < LOW_TIME_MINUTES {
            Urgency::Critical
        } else if minutes < WARNING_MINUTES {
            Urgency::Warning
        } else {
            Urgency::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingInfo {
    pub remaining: f64,
    pub limit: f64,
    pub used: f64,
    /// Tomorrow's limit.
    pub next_decrease: f64,
    /// Counting the first day as 1.
    pub days_in_detox: u32,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub detox_count: usize,
    /// Sum of lifetime usage across detox domains, in minutes.
    pub total_saved_minutes: f64,
    /// Mean progress towards the floor, in percent.
    pub average_progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "kebab-case")]
pub enum PanelNotice {
    LowTime { domain: Domain, remaining: f64 },
    Reset { count: usize },
}

#[derive(Debug, Default)]
pub struct ControlPanel {
    replica: Option<StateReplica>,
    display: BTreeMap<Domain, QuotaInfo>,
}

impl ControlPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sent when the panel opens.
    pub fn open_request(&self) -> Request {
        Request::GetState
    }

    pub fn replica(&self) -> Option<&StateReplica> {
        self.replica.as_ref()
    }

    pub fn on_state(&mut self, replica: StateReplica) {
        self.display = replica
            .quota_records
            .iter()
            .map(|(d, r)| {
                let info = QuotaInfo {
                    remaining: r.remaining_time(),
                    limit: r.daily_limit(),
                    used: r.used_time_today(),
                };
                (d.clone(), info)
            })
            .collect();
        self.replica = Some(replica);
    }

    /// Handle the coordinator's answer to a request this panel sent.
    /// Returns the rejection, if any, for display.
    pub fn on_response(&mut self, response: Response) -> Option<EditError> {
        match response {
            Response::State(replica) => {
                self.on_state(replica);
                None
            }
            Response::Rejected { error } => Some(error),
            Response::Applied { .. }
            | Response::Ack
            | Response::Verdict { .. }
            | Response::QuotaInfo { .. } => None,
        }
    }

    pub fn on_push(&mut self, push: &Push) -> Option<PanelNotice> {
        match push {
            Push::StateChanged(replica) => {
                self.on_state(replica.clone());
                None
            }
            Push::UsageDelta { domain, minutes } => {
                let info = self.display.get_mut(domain)?;
                info.used += minutes.max(0.0);
                info.remaining = (info.limit - info.used).max(0.0);
                (info.remaining < LOW_TIME_MINUTES).then(|| PanelNotice::LowTime {
                    domain: domain.clone(),
                    remaining: info.remaining,
                })
            }
            Push::DetoxReset { count } => Some(PanelNotice::Reset { count: *count }),
            Push::TimeRemaining { .. } | Push::QuotaExhausted { .. } => None,
        }
    }

    /// Validate `input` and build the add request.
    pub fn add_domain(
        &self,
        input: &str,
        category: Category,
        mode: Option<BlockMode>,
    ) -> Result<Request, ValidationError> {
        let domain = Domain::parse(input)?;
        if let Some(replica) = &self.replica {
            if replica.rules.iter().any(|r| r.name == domain) {
                return Err(ValidationError::AlreadyListed(domain.to_string()));
            }
        }
        Ok(self.edit(Edit::AddRule {
            domain: domain.to_string(),
            category,
            mode,
        }))
    }

    pub fn remove_domain(&self, domain: &Domain) -> Request {
        self.edit(Edit::RemoveRule {
            domain: domain.to_string(),
        })
    }

    pub fn clear_all(&self) -> Request {
        self.edit(Edit::ClearRules)
    }

    pub fn set_enabled(&self, enabled: bool) -> Request {
        self.edit(Edit::SetEnabled { enabled })
    }

    pub fn set_mode(&self, mode: BlockMode) -> Request {
        self.edit(Edit::SetMode { mode })
    }

    fn edit(&self, edit: Edit) -> Request {
        let request = EditRequest::single(edit);
        Request::ApplyEdit(match &self.replica {
            Some(replica) => request.at_revision(replica.revision),
            None => request,
        })
    }

    /// Cached view of one domain's quota.
    pub fn display(&self, domain: &Domain) -> Option<&QuotaInfo> {
        self.display.get(domain)
    }

    /// Remaining-time details, rebasing the replica's record first.
    pub fn time_info(&self, domain: &Domain, now: DateTime<Utc>) -> Option<RemainingInfo> {
        let replica = self.replica.as_ref()?;
        let scheduler = replica.scheduler();
        let mut record = replica.quota_records.get(domain)?.clone();
        let rebased = scheduler.rebase_if_stale(&mut record, now);

        // Usage deltas since the last full refresh still apply today.
        let (remaining, used) = match self.display.get(domain) {
            Some(info) if !rebased => (info.remaining, info.used),
            _ => (record.remaining_time(), record.used_time_today()),
        };
        Some(RemainingInfo {
            remaining,
            limit: record.daily_limit(),
            used,
            next_decrease: scheduler.policy().next_limit(record.daily_limit()),
            days_in_detox: scheduler.detox_day(&record, now),
            urgency: Urgency::for_remaining(remaining),
        })
    }

    pub fn summary(&self, now: DateTime<Utc>) -> Summary {
        let Some(replica) = &self.replica else {
            return Summary {
                detox_count: 0,
                total_saved_minutes: 0.0,
                average_progress: 0.0,
            };
        };
        summarize(replica, now)
    }
}

/// Totals over a replica's detox domains.
pub fn summarize(replica: &StateReplica, now: DateTime<Utc>) -> Summary {
    let policy = replica.policy;
    let records = &replica.quota_records;
    let detox_count = records.len();
    let total_saved_minutes = records.values().map(|r| r.total_used_time()).sum();
    let average_progress = if detox_count == 0 {
        0.0
    } else {
        records
            .values()
            .map(|r| policy.progress_percent(DecayPolicy::days_since(r.start_date(), now)))
            .sum::<f64>()
            / detox_count as f64
    };
    Summary {
        detox_count,
        total_saved_minutes,
        average_progress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockRule, GlobalState, QuotaRecord};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn youtube() -> Domain {
        Domain::parse("youtube.com").unwrap()
    }

    fn opened() -> ControlPanel {
        let mut state = GlobalState::default();
        state
            .rules
            .push(BlockRule::new(youtube(), Category::Other, BlockMode::Detox, t0()));
        state
            .quota_records
            .insert(youtube(), QuotaRecord::new(&DecayPolicy::default(), t0()));
        state.revision = 4;
        let mut panel = ControlPanel::new();
        panel.on_state(StateReplica::from_state(&state, DecayPolicy::default(), 0));
        panel
    }

    #[test]
    fn add_validates_and_prechecks_duplicates() {
        let panel = opened();
        assert_eq!(
            panel.add_domain("  ", Category::Other, None),
            Err(ValidationError::EmptyDomain)
        );
        assert_eq!(
            panel.add_domain("YouTube.com", Category::Other, None),
            Err(ValidationError::AlreadyListed("youtube.com".into()))
        );
        let req = panel.add_domain("Reddit.com ", Category::Social, None).unwrap();
        match req {
            Request::ApplyEdit(edit) => {
                assert_eq!(edit.expected_revision, Some(4));
                assert!(matches!(&edit.edits[..], [Edit::AddRule { domain, .. }] if domain == "reddit.com"));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn usage_delta_warns_when_low() {
        let mut panel = opened();
        let push = Push::UsageDelta { domain: youtube(), minutes: 50.0 };
        assert_eq!(panel.on_push(&push), None);
        let push = Push::UsageDelta { domain: youtube(), minutes: 6.0 };
        assert_eq!(
            panel.on_push(&push),
            Some(PanelNotice::LowTime { domain: youtube(), remaining: 4.0 })
        );
        let info = panel.time_info(&youtube(), t0()).unwrap();
        assert_eq!(info.used, 56.0);
        assert_eq!(info.urgency, Urgency::Critical);
    }

    #[test]
    fn time_info_rebases_stale_replica() {
        let panel = opened();
        let info = panel.time_info(&youtube(), t0() + Duration::days(2)).unwrap();
        assert_eq!(info.limit, 40.0);
        assert_eq!(info.remaining, 40.0);
        assert_eq!(info.next_decrease, 30.0);
        assert_eq!(info.days_in_detox, 3);
        assert_eq!(info.urgency, Urgency::Normal);
    }

    #[test]
    fn urgency_thresholds() {
        assert_eq!(Urgency::for_remaining(4.9), Urgency::Critical);
        assert_eq!(Urgency::for_remaining(5.0), Urgency::Warning);
        assert_eq!(Urgency::for_remaining(14.9), Urgency::Warning);
        assert_eq!(Urgency::for_remaining(15.0), Urgency::Normal);
    }

    #[test]
    fn summary_averages_progress() {
        let panel = opened();
        let summary = panel.summary(t0() + Duration::days(11));
        assert_eq!(summary.detox_count, 1);
        assert_eq!(summary.average_progress, 100.0);
        assert_eq!(ControlPanel::new().summary(t0()).detox_count, 0);
    }
}
