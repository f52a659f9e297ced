use cailo_core::{MemoryHost, Request, Verdict};
use chrono::Utc;

use super::{open_coordinator, CliResult};

pub fn run(url: &str, report: bool) -> CliResult {
    let (mut coordinator, _) = open_coordinator(MemoryHost::new())?;
    let now = Utc::now();
    match coordinator.check_url(url, now) {
        Verdict::Allowed => println!("allowed"),
        Verdict::Blocked { domain, reason } => {
            let reason = serde_json::to_value(reason)?;
            println!("blocked: {domain} ({})", reason.as_str().unwrap_or("blocked"));
            if report {
                coordinator.handle_request(
                    Request::ReportBlock {
                        domain,
                        url: url.to_string(),
                    },
                    now,
                );
            }
        }
    }
    Ok(())
}
