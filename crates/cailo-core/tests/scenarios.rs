//! End-to-end quota scenarios driven through the coordinator.
//!
//! Each test builds a coordinator over an in-memory store and host with a
//! UTC day boundary, then feeds it requests, tab events and ticks with
//! explicit timestamps.

use cailo_core::sync::ControlPanel;
use cailo_core::{
    BlockMode, BlockReason, Category, Coordinator, Database, DecayPolicy, Domain, Edit,
    EditError, EditRequest, MemoryHost, MemoryStore, Push, QuotaScheduler, Request, Response,
    TabEvent, Tick, Verdict,
};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

// ============================================================================
// Helpers
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn scheduler() -> QuotaScheduler {
    QuotaScheduler::new(DecayPolicy::default(), FixedOffset::east_opt(0).unwrap())
}

fn coordinator() -> Coordinator<MemoryStore, MemoryHost> {
    Coordinator::new(MemoryStore::new(), MemoryHost::new(), scheduler(), Duration::seconds(30), t0())
}

fn add_rule(domain: &str, mode: BlockMode) -> Request {
    Request::ApplyEdit(EditRequest::single(Edit::AddRule {
        domain: domain.to_string(),
        category: Category::Social,
        mode: Some(mode),
    }))
}

fn remove_rule(domain: &str) -> Request {
    Request::ApplyEdit(EditRequest::single(Edit::RemoveRule {
        domain: domain.to_string(),
    }))
}

fn youtube() -> Domain {
    Domain::parse("youtube.com").unwrap()
}

// ============================================================================
// Scenario A: decay over consecutive days
// ============================================================================

#[test]
fn limit_decays_daily_to_floor() {
    let mut c = coordinator();
    c.handle_request(add_rule("youtube.com", BlockMode::Detox), t0());

    let mut limits = Vec::new();
    for day in 0..8 {
        c.handle_tick(Tick::DailyReset, t0() + Duration::days(day));
        limits.push(c.state().quota_records[&youtube()].daily_limit());
    }
    assert_eq!(limits, vec![60.0, 50.0, 40.0, 30.0, 20.0, 10.0, 5.0, 5.0]);
}

// ============================================================================
// Scenario B: exhaustion and lockout sweep
// ============================================================================

#[test]
fn crossing_flush_triggers_single_lockout_sweep() {
    let mut c = coordinator();
    c.handle_request(add_rule("youtube.com", BlockMode::Detox), t0());

    let background = c.host_mut().open_tab(2, "https://m.youtube.com/feed");
    let focused = c.host_mut().open_tab(1, "https://www.youtube.com/watch?v=1");
    c.handle_tab_event(
        TabEvent::Activated { tab: focused, url: "https://www.youtube.com/watch?v=1".into() },
        t0(),
    );

    c.handle_tick(Tick::UsageTracking, t0() + Duration::minutes(25));
    let rec = &c.state().quota_records[&youtube()];
    assert_eq!(rec.used_time_today(), 25.0);
    assert_eq!(rec.remaining_time(), 35.0);
    assert!(c.host().notices.is_empty());

    c.handle_tick(Tick::UsageTracking, t0() + Duration::minutes(65));
    let rec = &c.state().quota_records[&youtube()];
    assert_eq!(rec.used_time_today(), 65.0);
    assert_eq!(rec.remaining_time(), 0.0);

    assert_eq!(c.host().notices.len(), 1);
    let redirected: Vec<_> = c.host().redirects.iter().map(|(tab, _)| *tab).collect();
    assert_eq!(redirected.len(), 2);
    assert!(redirected.contains(&focused) && redirected.contains(&background));
    assert!(c
        .host()
        .sent_to(background)
        .any(|p| matches!(p, Push::QuotaExhausted { .. })));

    // Further ticks do not sweep again.
    c.handle_tick(Tick::UsageTracking, t0() + Duration::minutes(66));
    c.handle_tick(Tick::UsageTracking, t0() + Duration::minutes(90));
    assert_eq!(c.host().notices.len(), 1);
    assert_eq!(c.host().redirects.len(), 2);

    let verdict = c.check_url("https://youtube.com/", t0() + Duration::minutes(91));
    assert_eq!(
        verdict,
        Verdict::Blocked { domain: youtube(), reason: BlockReason::QuotaExhausted }
    );
}

#[test]
fn block_stays_until_next_day() {
    let mut c = coordinator();
    c.handle_request(add_rule("youtube.com", BlockMode::Detox), t0());
    let tab = c.host_mut().open_tab(1, "https://youtube.com/");
    c.handle_tab_event(TabEvent::Activated { tab, url: "https://youtube.com/".into() }, t0());
    c.handle_tick(Tick::UsageTracking, t0() + Duration::minutes(61));

    for minutes in [62, 120, 600, 899] {
        let at = t0() + Duration::minutes(minutes);
        assert!(c.check_url("https://youtube.com/", at).is_blocked(), "at +{minutes}m");
    }
    let tomorrow = t0() + Duration::minutes(900);
    assert!(!c.check_url("https://youtube.com/", tomorrow).is_blocked());
}

// ============================================================================
// Scenario C: stale record is rebased before any read
// ============================================================================

#[test]
fn reads_rebase_stale_record_first() {
    let mut c = coordinator();
    c.handle_request(add_rule("youtube.com", BlockMode::Detox), t0());
    let tab = c.host_mut().open_tab(1, "https://youtube.com/");
    c.handle_tab_event(TabEvent::Activated { tab, url: "https://youtube.com/".into() }, t0());
    c.handle_tab_event(TabEvent::Removed { tab }, t0() + Duration::minutes(30));
    assert_eq!(c.state().quota_records[&youtube()].used_time_today(), 30.0);

    let tomorrow = t0() + Duration::days(1);
    let resp = c.handle_request(Request::GetQuotaInfo { domain: youtube() }, tomorrow);
    let Response::QuotaInfo { info: Some(info) } = resp else {
        panic!("expected quota info, got {resp:?}");
    };
    assert_eq!(info.used, 0.0);
    assert_eq!(info.limit, 50.0);
    assert_eq!(info.remaining, 50.0);

    let rec = &c.state().quota_records[&youtube()];
    assert_eq!(rec.total_used_time(), 30.0);
    assert_eq!(rec.last_reset(), tomorrow);
}

#[test]
fn panel_rebases_its_replica_locally() {
    let mut c = coordinator();
    c.handle_request(add_rule("youtube.com", BlockMode::Detox), t0());
    let Response::State(replica) = c.handle_request(Request::GetState, t0()) else {
        panic!("expected state");
    };
    let mut panel = ControlPanel::new();
    panel.on_state(replica);
    let info = panel.time_info(&youtube(), t0() + Duration::days(1)).unwrap();
    assert_eq!(info.limit, 50.0);
    assert_eq!(info.days_in_detox, 2);
}

// ============================================================================
// Scenario D: duplicate add
// ============================================================================

#[test]
fn duplicate_add_is_rejected_without_side_effects() {
    let mut c = coordinator();
    c.handle_request(add_rule("youtube.com", BlockMode::Detox), t0());
    let before = c.state().clone();

    let resp = c.handle_request(add_rule("YouTube.com", BlockMode::Normal), t0() + Duration::minutes(1));
    assert_eq!(
        resp,
        Response::Rejected { error: EditError::DuplicateDomain { domain: "youtube.com".into() } }
    );
    assert_eq!(c.state(), &before);
    assert_eq!(c.state().quota_records.len(), 1);
}

// ============================================================================
// Scenario E: removal
// ============================================================================

#[test]
fn remove_deletes_rule_and_record() {
    let mut c = coordinator();
    c.handle_request(add_rule("youtube.com", BlockMode::Detox), t0());
    let tab = c.host_mut().open_tab(1, "https://youtube.com/");
    c.handle_tab_event(TabEvent::Activated { tab, url: "https://youtube.com/".into() }, t0());
    assert!(c.tracker().is_tracking(tab));

    let resp = c.handle_request(remove_rule("youtube.com"), t0() + Duration::minutes(5));
    assert!(matches!(resp, Response::Applied { .. }));
    assert!(c.state().rules.is_empty());
    assert!(c.state().quota_records.is_empty());
    assert!(!c.tracker().is_tracking(tab));
    assert_eq!(c.check_url("https://youtube.com/", t0() + Duration::minutes(6)), Verdict::Allowed);

    let resp = c.handle_request(remove_rule("youtube.com"), t0() + Duration::minutes(7));
    assert_eq!(
        resp,
        Response::Rejected { error: EditError::UnknownDomain { domain: "youtube.com".into() } }
    );
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn state_survives_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cailo.db");

    {
        let db = Database::open_at(&path).unwrap();
        let mut c = Coordinator::new(db, MemoryHost::new(), scheduler(), Duration::seconds(30), t0());
        c.handle_request(add_rule("youtube.com", BlockMode::Detox), t0());
        c.handle_request(add_rule("reddit.com", BlockMode::Normal), t0());
        c.handle_request(
            Request::ReportBlock { domain: Domain::parse("reddit.com").unwrap(), url: "https://reddit.com".into() },
            t0(),
        );
    }

    let db = Database::open_at(&path).unwrap();
    let c = Coordinator::new(db, MemoryHost::new(), scheduler(), Duration::seconds(30), t0());
    assert_eq!(c.state().rules.len(), 2);
    assert_eq!(c.state().rules[0].name.as_str(), "reddit.com");
    assert_eq!(c.state().quota_records.len(), 1);
    assert_eq!(c.state().lockouts_on("2024-03-01"), 1);
    assert_eq!(c.state().revision, 2);
    assert_eq!(c.badge_text(), "1");
}
