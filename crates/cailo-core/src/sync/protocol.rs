//! Messages exchanged between the coordinator, page monitors and the
//! control surface.
//!
//! Everything is JSON with an internal `type` tag, so a page monitor or panel
//! written in any language can speak it:
//!
//! ```json
//! {"type":"apply-edit","edits":[{"op":"add-rule","domain":"reddit.com"}]}
//! ```

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::block::Verdict;
use crate::error::EditError;
use crate::host::TabId;
use crate::model::{BlockMode, BlockRule, Category, Domain, GlobalState, QuotaMap};
use crate::quota::{DecayPolicy, QuotaScheduler};

/// Request addressed to the coordinator. Each has exactly one [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    GetState,
    ApplyEdit(EditRequest),
    ReportBlock { domain: Domain, url: String },
    CheckUrl { url: String },
    GetQuotaInfo { domain: Domain },
    /// A page's local countdown for `domain` reached zero.
    LimitReached { domain: Domain },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub edits: Vec<Edit>,
    /// Revision of the replica the edit was made against. When present and
    /// different from the canonical revision the edit is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<u64>,
}

impl EditRequest {
    pub fn new(edits: Vec<Edit>) -> Self {
        Self {
            edits,
            expected_revision: None,
        }
    }

    pub fn single(edit: Edit) -> Self {
        Self::new(vec![edit])
    }

    pub fn at_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }
}

/// A typed delta against the rule set or flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Edit {
    /// `domain` is raw user input; the coordinator validates it.
    AddRule {
        domain: String,
        #[serde(default)]
        category: Category,
        /// Falls back to the global default mode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<BlockMode>,
    },
    RemoveRule { domain: String },
    ClearRules,
    SetEnabled { enabled: bool },
    SetMode { mode: BlockMode },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Response {
    State(StateReplica),
    Applied { revision: u64 },
    Rejected { error: EditError },
    Ack,
    Verdict { verdict: Verdict },
    QuotaInfo { info: Option<QuotaInfo> },
}

/// Unsolicited message from the coordinator. Delivery is best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Push {
    StateChanged(StateReplica),
    UsageDelta {
        domain: Domain,
        minutes: f64,
    },
    TimeRemaining {
        domain: Domain,
        remaining: f64,
        limit: f64,
        used: f64,
    },
    QuotaExhausted {
        domain: Domain,
        daily_limit: f64,
    },
    DetoxReset {
        count: usize,
    },
}

/// Everything a replica needs to evaluate and display state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateReplica {
    pub enabled: bool,
    pub mode: BlockMode,
    pub rules: Vec<BlockRule>,
    pub quota_records: QuotaMap,
    pub revision: u64,
    pub policy: DecayPolicy,
    /// Offset defining calendar days, so replicas can rebase locally.
    pub utc_offset_minutes: i32,
}

impl StateReplica {
    pub fn from_state(state: &GlobalState, policy: DecayPolicy, utc_offset_minutes: i32) -> Self {
        Self {
            enabled: state.enabled,
            mode: state.mode,
            rules: state.rules.clone(),
            quota_records: state.quota_records.clone(),
            revision: state.revision,
            policy,
            utc_offset_minutes,
        }
    }

    /// Scheduler matching the coordinator's, for local rebasing.
    pub fn scheduler(&self) -> QuotaScheduler {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        QuotaScheduler::new(self.policy, offset)
    }

    /// Quota records as they stand at `now`, with stale days rebased.
    pub fn current_quotas(&self, now: DateTime<Utc>) -> QuotaMap {
        let mut quotas = self.quota_records.clone();
        self.scheduler().rebase_all(&mut quotas, now);
        quotas
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    pub remaining: f64,
    pub limit: f64,
    pub used: f64,
}

/// Tab-lifecycle notification from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TabEvent {
    /// The user switched to `tab`.
    Activated { tab: TabId, url: String },
    /// `tab` finished loading `url`.
    Updated { tab: TabId, url: String },
    Removed { tab: TabId },
    /// A window gained focus; `tab` is its active tab.
    WindowFocused { tab: TabId, url: String },
    /// `tab` is about to load `url`.
    BeforeNavigate { tab: TabId, url: String },
}

/// Named periodic triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tick {
    #[serde(rename = "dailyReset")]
    DailyReset,
    #[serde(rename = "timeTracking")]
    UsageTracking,
}
