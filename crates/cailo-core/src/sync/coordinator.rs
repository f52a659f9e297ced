//! The coordinator: sole owner of the canonical [`GlobalState`].
//!
//! Every input (requests, tab events, ticks) goes through one `&mut self`
//! method, so mutations are applied and persisted strictly in the order
//! they arrive. Each handler first rebases stale quota records, then does
//! its work, then persists and broadcasts as needed.
//!
//! Store and delivery failures never abort a handler: they are logged and
//! the in-memory state stays authoritative.

use chrono::{DateTime, Duration, Utc};

use crate::block::{self, resolve_host, BlockReason, Verdict};
use crate::error::EditError;
use crate::host::{BlockView, Host, Notice, TabId};
use crate::model::{BlockRule, Domain, GlobalState, QuotaRecord};
use crate::quota::QuotaScheduler;
use crate::storage::{Config, KvStore};
use crate::sync::protocol::{
    Edit, EditRequest, Push, QuotaInfo, Request, Response, StateReplica, TabEvent, Tick,
};
use crate::tracker::{tracked_domain, FlushReport, UsageTracker};

pub struct Coordinator<S: KvStore, H: Host> {
    state: GlobalState,
    store: S,
    host: H,
    scheduler: QuotaScheduler,
    tracker: UsageTracker,
    focused: Option<TabId>,
    notifications: bool,
}

impl<S: KvStore, H: Host> Coordinator<S, H> {
    /// Load state from `store`, repair it and rebase stale records.
    pub fn new(
        store: S,
        host: H,
        scheduler: QuotaScheduler,
        flush_threshold: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let state = GlobalState::load(&store).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not load state, starting empty");
            GlobalState::default()
        });
        let mut coordinator = Self {
            state,
            store,
            host,
            scheduler,
            tracker: UsageTracker::new(flush_threshold),
            focused: None,
            notifications: true,
        };

        let repair = coordinator.state.repair(scheduler.policy(), now);
        if !repair.is_empty() {
            tracing::warn!(
                created = repair.created.len(),
                dropped = repair.dropped.len(),
                duplicates = repair.duplicate_rules,
                floors = repair.floors_raised,
                "repaired persisted state"
            );
        }
        let rebased = scheduler.rebase_all(&mut coordinator.state.quota_records, now);
        if !repair.is_empty() || rebased > 0 {
            coordinator.persist();
        }
        tracing::info!(
            rules = coordinator.state.rules.len(),
            detox = coordinator.state.quota_records.len(),
            rebased,
            "coordinator loaded"
        );
        coordinator
    }

    pub fn from_config(config: &Config, store: S, host: H, now: DateTime<Utc>) -> Self {
        Self::new(store, host, config.scheduler(), config.flush_threshold(), now)
            .with_notifications(config.notifications.enabled)
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications = enabled;
        self
    }

    pub fn state(&self) -> &GlobalState {
        &self.state
    }

    pub fn scheduler(&self) -> &QuotaScheduler {
        &self.scheduler
    }

    pub fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn badge_text(&self) -> String {
        self.state.badge_text()
    }

    pub fn replica(&self) -> StateReplica {
        StateReplica::from_state(
            &self.state,
            *self.scheduler.policy(),
            self.scheduler.offset().local_minus_utc() / 60,
        )
    }

    // ── Requests ─────────────────────────────────────────────────────

    pub fn handle_request(&mut self, request: Request, now: DateTime<Utc>) -> Response {
        self.refresh(now);
        match request {
            Request::GetState => Response::State(self.replica()),
            Request::ApplyEdit(edit) => match self.apply_edits(edit, now) {
                Ok(revision) => Response::Applied { revision },
                Err(error) => {
                    tracing::info!(%error, "edit rejected");
                    Response::Rejected { error }
                }
            },
            Request::ReportBlock { domain, url } => {
                self.record_block(&domain, &url, now);
                Response::Ack
            }
            Request::CheckUrl { url } => Response::Verdict {
                verdict: self.check_url(&url, now),
            },
            Request::GetQuotaInfo { domain } => Response::QuotaInfo {
                info: self.quota_info(&domain, now),
            },
            Request::LimitReached { domain } => {
                let flushes = self.tracker.flush_domain(
                    &domain,
                    &mut self.state.quota_records,
                    &self.scheduler,
                    now,
                );
                tracing::debug!(%domain, flushes = flushes.len(), "page countdown ran out");
                self.report_flushes(flushes, now);
                Response::Ack
            }
        }
    }

    /// Verdict for `url`, rebasing the matched record first.
    pub fn check_url(&mut self, url: &str, now: DateTime<Utc>) -> Verdict {
        let (verdict, rebased) = block::decide(&mut self.state, &self.scheduler, url, now);
        if rebased {
            self.persist();
            self.broadcast_state();
        }
        verdict
    }

    pub fn quota_info(&mut self, domain: &Domain, now: DateTime<Utc>) -> Option<QuotaInfo> {
        let record = self.state.quota_records.get_mut(domain)?;
        let rebased = self.scheduler.rebase_if_stale(record, now);
        let info = QuotaInfo {
            remaining: record.remaining_time(),
            limit: record.daily_limit(),
            used: record.used_time_today(),
        };
        if rebased {
            self.persist();
        }
        Some(info)
    }

    fn record_block(&mut self, domain: &Domain, url: &str, now: DateTime<Utc>) {
        let key = self.scheduler.date_key(now);
        let count = self.state.lockout_counts.entry(key).or_insert(0);
        *count = count.saturating_add(1);
        tracing::info!(%domain, url, today = *count, "block reported");
        self.persist();
    }

    /// Apply a batch of edits atomically: either all succeed or the state
    /// is left untouched.
    pub fn apply_edits(&mut self, request: EditRequest, now: DateTime<Utc>) -> Result<u64, EditError> {
        if let Some(expected) = request.expected_revision {
            if expected != self.state.revision {
                return Err(EditError::StaleRevision {
                    expected,
                    current: self.state.revision,
                });
            }
        }

        let mut next = self.state.clone();
        let mut removed = Vec::new();
        for edit in request.edits {
            apply_edit(&mut next, edit, &self.scheduler, now, &mut removed)?;
        }

        for domain in &removed {
            // The record is going away with the rule; the flush only closes
            // the session.
            self.tracker
                .end_domain(domain, &mut self.state.quota_records, &self.scheduler, now);
        }
        next.revision = self.state.revision.wrapping_add(1);
        self.state = next;

        if !self.state.enabled {
            let flushes = self.tracker.end_others(
                None,
                &mut self.state.quota_records,
                &self.scheduler,
                now,
            );
            self.report_flushes(flushes, now);
        }

        self.persist();
        self.broadcast_state();
        tracing::info!(revision = self.state.revision, "edit applied");
        Ok(self.state.revision)
    }

    // ── Tab events ───────────────────────────────────────────────────

    pub fn handle_tab_event(&mut self, event: TabEvent, now: DateTime<Utc>) {
        self.refresh(now);
        match event {
            TabEvent::Activated { tab, url } | TabEvent::WindowFocused { tab, url } => {
                self.focus(tab, &url, now);
            }
            TabEvent::Updated { tab, url } => {
                if self.focused.is_none() {
                    self.focused = Some(tab);
                }
                if self.focused == Some(tab) {
                    self.track(tab, &url, now);
                } else {
                    self.end_session(tab, now);
                }
            }
            TabEvent::Removed { tab } => {
                if self.focused == Some(tab) {
                    self.focused = None;
                }
                self.end_session(tab, now);
            }
            TabEvent::BeforeNavigate { tab, url } => self.guard_navigation(tab, &url, now),
        }
    }

    fn focus(&mut self, tab: TabId, url: &str, now: DateTime<Utc>) {
        self.focused = Some(tab);
        let flushes = self.tracker.end_others(
            Some(tab),
            &mut self.state.quota_records,
            &self.scheduler,
            now,
        );
        self.report_flushes(flushes, now);
        self.track(tab, url, now);
    }

    fn guard_navigation(&mut self, tab: TabId, url: &str, now: DateTime<Utc>) {
        let verdict = self.check_url(url, now);
        let Verdict::Blocked { domain, reason } = verdict else {
            return;
        };
        self.end_session(tab, now);
        let view = BlockView {
            domain,
            url: url.to_string(),
            reason,
        };
        if let Err(e) = self.host.redirect(tab, &view) {
            tracing::debug!(%tab, error = %e, "redirect failed");
        }
    }

    // ── Ticks ────────────────────────────────────────────────────────

    pub fn handle_tick(&mut self, tick: Tick, now: DateTime<Utc>) {
        match tick {
            Tick::DailyReset => {
                let rebased = self
                    .scheduler
                    .rebase_all(&mut self.state.quota_records, now);
                if rebased > 0 {
                    self.persist();
                    self.broadcast_state();
                }
                let count = self.state.quota_records.len();
                tracing::info!(rebased, count, "daily reset");
                self.broadcast(Push::DetoxReset { count });
            }
            Tick::UsageTracking => {
                self.refresh(now);
                match self.host.focused_tab() {
                    Some(tab) => {
                        if self.focused != Some(tab.id) {
                            self.focus(tab.id, &tab.url, now);
                        } else {
                            self.track(tab.id, &tab.url, now);
                        }
                    }
                    None => {
                        self.focused = None;
                        let flushes = self.tracker.end_others(
                            None,
                            &mut self.state.quota_records,
                            &self.scheduler,
                            now,
                        );
                        self.report_flushes(flushes, now);
                    }
                }
            }
        }
    }

    // ── Tracking ─────────────────────────────────────────────────────

    fn track(&mut self, tab: TabId, url: &str, now: DateTime<Utc>) {
        let domain = if self.state.enabled {
            tracked_domain(&self.state.rules, &self.state.quota_records, url)
        } else {
            None
        };
        let outcome = self.tracker.observe(
            tab,
            domain.as_ref(),
            &mut self.state.quota_records,
            &self.scheduler,
            now,
        );
        let started = outcome.started;
        self.report_flushes(outcome.flushes, now);
        if let Some((tab, domain)) = started {
            self.send_time_remaining(tab, &domain);
        }
    }

    fn end_session(&mut self, tab: TabId, now: DateTime<Utc>) {
        let flushes: Vec<FlushReport> = self
            .tracker
            .end(tab, &mut self.state.quota_records, &self.scheduler, now)
            .into_iter()
            .collect();
        self.report_flushes(flushes, now);
    }

    fn report_flushes(&mut self, flushes: Vec<FlushReport>, now: DateTime<Utc>) {
        if flushes.is_empty() {
            return;
        }
        self.persist();
        for report in flushes {
            self.broadcast(Push::UsageDelta {
                domain: report.domain.clone(),
                minutes: report.minutes,
            });
            self.send_to_tab(
                report.tab,
                Push::TimeRemaining {
                    domain: report.domain.clone(),
                    remaining: report.remaining,
                    limit: report.daily_limit,
                    used: report.used_today,
                },
            );
            if report.exhausted {
                self.lockout_sweep(&report.domain, now);
            }
        }
    }

    fn send_time_remaining(&mut self, tab: TabId, domain: &Domain) {
        let Some(record) = self.state.quota_records.get(domain) else {
            return;
        };
        let push = Push::TimeRemaining {
            domain: domain.clone(),
            remaining: record.remaining_time(),
            limit: record.daily_limit(),
            used: record.used_time_today(),
        };
        self.send_to_tab(tab, push);
    }

    /// Redirect every open tab showing `domain` and notify once.
    fn lockout_sweep(&mut self, domain: &Domain, now: DateTime<Utc>) {
        if !self.state.enabled {
            return;
        }
        let daily_limit = self
            .state
            .quota_records
            .get(domain)
            .map(QuotaRecord::daily_limit)
            .unwrap_or_default();

        let targets: Vec<_> = self
            .host
            .open_tabs()
            .into_iter()
            .filter(|t| resolve_host(&t.url).is_some_and(|h| domain.matches_host(&h)))
            .collect();
        tracing::info!(%domain, tabs = targets.len(), "quota exhausted, locking out");

        for tab in targets {
            let view = BlockView {
                domain: domain.clone(),
                url: tab.url.clone(),
                reason: BlockReason::QuotaExhausted,
            };
            self.send_to_tab(
                tab.id,
                Push::QuotaExhausted {
                    domain: domain.clone(),
                    daily_limit,
                },
            );
            if let Err(e) = self.host.redirect(tab.id, &view) {
                tracing::debug!(tab = %tab.id, error = %e, "redirect failed");
            }
            if self
                .tracker
                .end(tab.id, &mut self.state.quota_records, &self.scheduler, now)
                .is_some()
            {
                self.persist();
            }
        }

        if self.notifications {
            self.host.notify(&Notice::lockout(domain, daily_limit));
        }
    }

    // ── Plumbing ─────────────────────────────────────────────────────

    /// Rebase stale records before anything reads them.
    fn refresh(&mut self, now: DateTime<Utc>) {
        let rebased = self
            .scheduler
            .rebase_all(&mut self.state.quota_records, now);
        if rebased > 0 {
            tracing::info!(rebased, "rebased quota records for a new day");
            self.persist();
            self.broadcast_state();
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.state.save(&mut self.store) {
            tracing::warn!(error = %e, "failed to persist state");
        }
    }

    fn broadcast_state(&mut self) {
        let replica = self.replica();
        self.broadcast(Push::StateChanged(replica));
    }

    fn broadcast(&mut self, push: Push) {
        if let Err(e) = self.host.broadcast(&push) {
            tracing::debug!(error = %e, "broadcast dropped");
        }
    }

    fn send_to_tab(&mut self, tab: TabId, push: Push) {
        if let Err(e) = self.host.send_to_tab(tab, &push) {
            tracing::debug!(%tab, error = %e, "push dropped");
        }
    }
}

fn apply_edit(
    state: &mut GlobalState,
    edit: Edit,
    scheduler: &QuotaScheduler,
    now: DateTime<Utc>,
    removed: &mut Vec<Domain>,
) -> Result<(), EditError> {
    match edit {
        Edit::AddRule {
            domain,
            category,
            mode,
        } => {
            let name = Domain::parse(&domain)?;
            if state.contains(&name) {
                return Err(EditError::DuplicateDomain {
                    domain: name.to_string(),
                });
            }
            let rule = BlockRule::new(name, category, mode.unwrap_or(state.mode), now);
            if rule.detox_mode {
                state
                    .quota_records
                    .insert(rule.name.clone(), QuotaRecord::new(scheduler.policy(), now));
            }
            state.rules.insert(0, rule);
        }
        Edit::RemoveRule { domain } => {
            let name = Domain::from(domain);
            let Some(index) = state.rules.iter().position(|r| r.name == name) else {
                return Err(EditError::UnknownDomain {
                    domain: name.to_string(),
                });
            };
            state.rules.remove(index);
            state.quota_records.remove(&name);
            removed.push(name);
        }
        Edit::ClearRules => {
            removed.extend(state.rules.drain(..).map(|r| r.name));
            state.quota_records.clear();
        }
        Edit::SetEnabled { enabled } => state.enabled = enabled,
        Edit::SetMode { mode } => state.mode = mode,
    }
    Ok(())
}
