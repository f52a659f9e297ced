use cailo_core::MemoryHost;
use chrono::Utc;
use serde_json::json;

use super::{format_minutes, open_coordinator, panel_for, CliResult};

pub fn run(as_json: bool) -> CliResult {
    let (coordinator, _) = open_coordinator(MemoryHost::new())?;
    let now = Utc::now();
    let state = coordinator.state();
    let summary = panel_for(&coordinator).summary(now);

    if as_json {
        let out = json!({
            "lockouts": state.lockout_counts,
            "total": state.total_lockouts(),
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if state.lockout_counts.is_empty() {
        println!("no blocks recorded");
    }
    for (day, count) in &state.lockout_counts {
        println!("{day}  {count:>4}");
    }
    println!("total blocks: {}", state.total_lockouts());
    println!(
        "detox domains: {}   time used: {}   progress: {:.0}%",
        summary.detox_count,
        format_minutes(summary.total_saved_minutes),
        summary.average_progress
    );
    Ok(())
}
