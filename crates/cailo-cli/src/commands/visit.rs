use cailo_core::{matching_rule, resolve_host, MemoryHost, TabEvent, Tick, Verdict};
use chrono::{Duration, Utc};

use super::{format_minutes, open_coordinator, print_notices, CliResult};

const VISIT_TAB: u32 = 1;

/// Replay a focused visit that ended now and lasted `minutes`.
///
/// The visit is clipped to the start of the current day so the usage
/// lands on today's quota. Durations longer than that are clipped too.
pub fn run(url: &str, minutes: f64) -> CliResult {
    if !minutes.is_finite() || minutes < 0.0 {
        return Err(format!("invalid duration: {minutes}").into());
    }
    let mut host = MemoryHost::new();
    let tab = host.open_tab(VISIT_TAB, url);
    let (mut coordinator, _) = open_coordinator(host)?;

    let now = Utc::now();
    let scheduler = *coordinator.scheduler();
    let day_start = scheduler
        .calendar_date(now)
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(scheduler.offset()).single())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now);
    let start = Duration::try_milliseconds((minutes * 60_000.0).round() as i64)
        .and_then(|elapsed| now.checked_sub_signed(elapsed))
        .map_or(day_start, |start| start.max(day_start));

    let domain = match coordinator.check_url(url, start) {
        Verdict::Blocked { domain, .. } => {
            println!("blocked: {domain}");
            return Ok(());
        }
        Verdict::Allowed => resolve_host(url).and_then(|host| {
            matching_rule(&coordinator.state().rules, &host).map(|r| r.name.clone())
        }),
    };

    coordinator.handle_tab_event(
        TabEvent::Activated {
            tab,
            url: url.to_string(),
        },
        start,
    );
    coordinator.handle_tick(Tick::UsageTracking, now);
    coordinator.handle_tab_event(TabEvent::Removed { tab }, now);

    match domain.and_then(|d| coordinator.quota_info(&d, now).map(|info| (d, info))) {
        Some((domain, info)) => println!(
            "{domain}: {} used today, {} left of {}",
            format_minutes(info.used),
            format_minutes(info.remaining),
            format_minutes(info.limit)
        ),
        None => println!("not tracked"),
    }
    print_notices(&coordinator);
    Ok(())
}
