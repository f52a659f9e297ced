use cailo_core::sync::panel::summarize;
use cailo_core::MemoryHost;
use chrono::Utc;
use serde_json::json;

use super::{format_minutes, open_coordinator, panel_for, CliResult};

pub fn run(as_json: bool) -> CliResult {
    let (coordinator, _) = open_coordinator(MemoryHost::new())?;
    let now = Utc::now();
    let panel = panel_for(&coordinator);
    let state = coordinator.state();
    let scheduler = coordinator.scheduler();

    let quotas: Vec<_> = state
        .quota_records
        .keys()
        .filter_map(|domain| panel.time_info(domain, now).map(|info| (domain, info)))
        .collect();
    let summary = summarize(&coordinator.replica(), now);
    let lockouts_today = state.lockouts_on(&scheduler.date_key(now));

    if as_json {
        let quotas: serde_json::Map<_, _> = quotas
            .iter()
            .map(|(domain, info)| Ok((domain.to_string(), serde_json::to_value(info)?)))
            .collect::<Result<_, serde_json::Error>>()?;
        let out = json!({
            "enabled": state.enabled,
            "mode": state.mode,
            "badge": coordinator.badge_text(),
            "rules": state.rules.len(),
            "quotas": quotas,
            "summary": summary,
            "lockoutsToday": lockouts_today,
            "hoursUntilReset": scheduler.hours_until_reset(now),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "blocking: {}   mode: {}   domains: {}",
        if state.enabled { "on" } else { "off" },
        format!("{:?}", state.mode).to_lowercase(),
        state.rules.len()
    );
    for (domain, info) in &quotas {
        println!(
            "  {:<32} {} left of {} (day {}, tomorrow {})  [{}]",
            domain.as_str(),
            format_minutes(info.remaining),
            format_minutes(info.limit),
            info.days_in_detox,
            format_minutes(info.next_decrease),
            format!("{:?}", info.urgency).to_lowercase()
        );
    }
    println!(
        "detox domains: {}   total time used: {}   progress: {:.0}%",
        summary.detox_count,
        format_minutes(summary.total_saved_minutes),
        summary.average_progress
    );
    println!(
        "blocks today: {}   next reset in {}h",
        lockouts_today,
        scheduler.hours_until_reset(now)
    );
    Ok(())
}
