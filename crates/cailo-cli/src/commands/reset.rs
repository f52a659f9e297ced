use cailo_core::{MemoryHost, Tick};
use chrono::Utc;

use super::{open_coordinator, CliResult};

pub fn run() -> CliResult {
    let (mut coordinator, _) = open_coordinator(MemoryHost::new())?;
    coordinator.handle_tick(Tick::DailyReset, Utc::now());
    let count = coordinator.state().quota_records.len();
    println!("daily reset complete for {count} detox domain(s)");
    Ok(())
}
