pub mod check;
pub mod config;
pub mod reset;
pub mod rule;
pub mod serve;
pub mod stats;
pub mod status;
pub mod toggle;
pub mod visit;

use cailo_core::sync::ControlPanel;
use cailo_core::{Config, Coordinator, Database, MemoryHost, Request, Response};
use chrono::Utc;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

pub type CliCoordinator = Coordinator<Database, MemoryHost>;

/// Open the persisted store and load a coordinator over it.
pub fn open_coordinator(host: MemoryHost) -> Result<(CliCoordinator, Config), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Database::open()?;
    let coordinator = Coordinator::from_config(&config, db, host, Utc::now());
    Ok((coordinator, config))
}

/// A control panel primed with the coordinator's current replica.
pub fn panel_for(coordinator: &CliCoordinator) -> ControlPanel {
    let mut panel = ControlPanel::new();
    panel.on_state(coordinator.replica());
    panel
}

/// Send an edit and turn a rejection into an error.
pub fn submit(coordinator: &mut CliCoordinator, request: Request) -> Result<u64, Box<dyn std::error::Error>> {
    match coordinator.handle_request(request, Utc::now()) {
        Response::Applied { revision } => Ok(revision),
        Response::Rejected { error } => Err(error.into()),
        other => Err(format!("unexpected response: {other:?}").into()),
    }
}

/// Print host notifications raised while handling a command.
pub fn print_notices(coordinator: &CliCoordinator) {
    for notice in &coordinator.host().notices {
        eprintln!("{}: {}", notice.title, notice.message);
    }
}

pub fn format_minutes(minutes: f64) -> String {
    if minutes >= 1.0 || minutes <= 0.0 {
        format!("{:.0} min", minutes.max(0.0).floor())
    } else {
        format!("{:.0} s", (minutes * 60.0).round())
    }
}
