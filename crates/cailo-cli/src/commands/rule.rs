use cailo_core::{BlockMode, Category, Domain, MemoryHost};
use clap::Subcommand;

use super::{format_minutes, open_coordinator, panel_for, submit, CliResult};

#[derive(Subcommand)]
pub enum RuleAction {
    /// Add a domain to the block list
    Add {
        /// Domain name (e.g. "reddit.com")
        domain: String,
        /// social, game or other
        #[arg(long, default_value = "other")]
        category: Category,
        /// detox or normal; defaults to the configured mode
        #[arg(long)]
        mode: Option<BlockMode>,
    },
    /// Remove a domain and its quota
    Remove {
        domain: String,
    },
    /// List blocked domains
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every domain
    Clear,
}

pub fn run(action: RuleAction) -> CliResult {
    let (mut coordinator, _config) = open_coordinator(MemoryHost::new())?;
    match action {
        RuleAction::Add {
            domain,
            category,
            mode,
        } => {
            let panel = panel_for(&coordinator);
            let request = panel.add_domain(&domain, category, mode)?;
            submit(&mut coordinator, request)?;
            let added = &coordinator.state().rules[0];
            println!("added {} ({:?}, {:?})", added.name, added.mode(), added.category);
        }
        RuleAction::Remove { domain } => {
            let panel = panel_for(&coordinator);
            submit(&mut coordinator, panel.remove_domain(&Domain::from(domain.clone())))?;
            println!("removed {}", domain.trim().to_lowercase());
        }
        RuleAction::List { json } => {
            let state = coordinator.state();
            if json {
                println!("{}", serde_json::to_string_pretty(&state.rules)?);
                return Ok(());
            }
            if state.rules.is_empty() {
                println!("no domains blocked");
            }
            for rule in &state.rules {
                let quota = state
                    .quota_records
                    .get(&rule.name)
                    .map(|r| {
                        format!(
                            "  {} left of {}",
                            format_minutes(r.remaining_time()),
                            format_minutes(r.daily_limit())
                        )
                    })
                    .unwrap_or_default();
                println!(
                    "{:<32} {:<7} {:<6}{}",
                    rule.name.as_str(),
                    format!("{:?}", rule.mode()).to_lowercase(),
                    format!("{:?}", rule.category).to_lowercase(),
                    quota
                );
            }
        }
        RuleAction::Clear => {
            let panel = panel_for(&coordinator);
            submit(&mut coordinator, panel.clear_all())?;
            println!("block list cleared");
        }
    }
    Ok(())
}
