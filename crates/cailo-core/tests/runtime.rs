//! Coordinator task tests: mailbox ordering, replies and channel delivery.

use std::sync::{Arc, Mutex};

use cailo_core::sync::{
    spawn_with_clock, ChannelBus, ChannelHost, ControlPanel, PageMonitor, PageView, Timers,
};
use cailo_core::{
    BlockMode, Category, Coordinator, CoreError, DecayPolicy, Domain, Edit, EditRequest,
    MemoryHost, MemoryStore, Push, QuotaScheduler, Request, Response, TabEvent, TabId,
};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

type TestHost = ChannelHost<MemoryHost>;

fn start(
    host: TestHost,
) -> (
    cailo_core::CoordinatorHandle,
    tokio::task::JoinHandle<Coordinator<MemoryStore, TestHost>>,
    Arc<Mutex<DateTime<Utc>>>,
) {
    let scheduler = QuotaScheduler::new(DecayPolicy::default(), FixedOffset::east_opt(0).unwrap());
    let coordinator = Coordinator::new(MemoryStore::new(), host, scheduler, Duration::seconds(30), t0());
    let clock = Arc::new(Mutex::new(t0()));
    let reader = clock.clone();
    let timers = Timers {
        tracking_interval: std::time::Duration::from_secs(3600),
        daily_reset: false,
    };
    let (handle, task) = spawn_with_clock(coordinator, timers, move || *reader.lock().unwrap());
    (handle, task, clock)
}

#[tokio::test]
async fn edits_are_applied_in_order_and_broadcast() {
    let bus = ChannelBus::new(32);
    let mut updates = bus.subscribe();
    let (handle, task, _clock) = start(ChannelHost::new(MemoryHost::new(), bus));

    let mut panel = ControlPanel::new();
    let resp = handle.request(panel.open_request()).await.unwrap();
    panel.on_response(resp);

    let add = panel.add_domain("reddit.com", Category::Social, Some(BlockMode::Detox)).unwrap();
    assert_eq!(handle.request(add).await.unwrap(), Response::Applied { revision: 1 });

    // Built against revision 0, so it is now stale.
    let stale = panel.set_enabled(false);
    let resp = handle.request(stale).await.unwrap();
    assert!(panel.on_response(resp).is_some());

    match updates.recv().await.unwrap() {
        Push::StateChanged(replica) => {
            assert_eq!(replica.revision, 1);
            panel.on_state(replica);
        }
        other => panic!("unexpected push {other:?}"),
    }
    let resp = handle.request(panel.set_enabled(false)).await.unwrap();
    assert_eq!(resp, Response::Applied { revision: 2 });

    handle.shutdown().await.unwrap();
    let coordinator = task.await.unwrap();
    assert!(!coordinator.state().enabled);
    assert_eq!(coordinator.state().rules.len(), 1);
}

#[tokio::test]
async fn page_monitor_receives_countdown() {
    let bus = ChannelBus::new(32);
    let tab = TabId(7);
    let mut page_rx = bus.attach(tab);
    let mut inner = MemoryHost::new();
    inner.open_tab(tab.0, "https://youtube.com/");
    let (handle, task, clock) = start(ChannelHost::new(inner, bus.clone()));

    let add = Request::ApplyEdit(EditRequest::single(Edit::AddRule {
        domain: "youtube.com".into(),
        category: Category::Other,
        mode: Some(BlockMode::Detox),
    }));
    handle.request(add).await.unwrap();

    let mut monitor = PageMonitor::new(tab, "https://youtube.com/");
    let Response::State(replica) = handle.request(monitor.load_request()).await.unwrap() else {
        panic!("expected state");
    };
    assert_eq!(monitor.on_state(replica, t0()), None);

    handle
        .tab_event(TabEvent::Activated { tab, url: "https://youtube.com/".into() })
        .await
        .unwrap();
    let push = page_rx.recv().await.unwrap();
    monitor.on_push(&push, t0());
    assert!(matches!(monitor.view(), PageView::Countdown { remaining_secs: 3600, .. }));

    *clock.lock().unwrap() = t0() + Duration::minutes(10);
    handle.tab_event(TabEvent::Removed { tab }).await.unwrap();
    let push = page_rx.recv().await.unwrap();
    assert_eq!(
        push,
        Push::TimeRemaining {
            domain: Domain::parse("youtube.com").unwrap(),
            remaining: 50.0,
            limit: 60.0,
            used: 10.0,
        }
    );

    drop(handle);
    let coordinator = task.await.unwrap();
    assert!(coordinator.tracker().is_empty());
}

#[tokio::test]
async fn requests_fail_after_shutdown() {
    let (handle, task, _clock) = start(ChannelHost::new(MemoryHost::new(), ChannelBus::new(4)));
    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(matches!(
        handle.request(Request::GetState).await,
        Err(CoreError::CoordinatorGone)
    ));
}
