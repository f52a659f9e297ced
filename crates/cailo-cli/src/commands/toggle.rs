use cailo_core::{BlockMode, MemoryHost};

use super::{open_coordinator, panel_for, submit, CliResult};

pub fn set_enabled(enabled: bool) -> CliResult {
    let (mut coordinator, _) = open_coordinator(MemoryHost::new())?;
    let panel = panel_for(&coordinator);
    submit(&mut coordinator, panel.set_enabled(enabled))?;
    println!("blocking {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

pub fn set_mode(mode: BlockMode) -> CliResult {
    let (mut coordinator, _) = open_coordinator(MemoryHost::new())?;
    let panel = panel_for(&coordinator);
    submit(&mut coordinator, panel.set_mode(mode))?;
    println!("default mode: {}", format!("{mode:?}").to_lowercase());
    Ok(())
}
