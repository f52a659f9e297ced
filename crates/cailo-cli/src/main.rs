use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "cailo", version, about = "Cai Lo Detox CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Block list management
    Rule {
        #[command(subcommand)]
        action: commands::rule::RuleAction,
    },
    /// Turn blocking on
    Enable,
    /// Turn blocking off
    Disable,
    /// Set the default mode for new domains (detox or normal)
    Mode {
        mode: cailo_core::BlockMode,
    },
    /// Show enablement, quotas and today's summary
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether a URL would be blocked right now
    Check {
        url: String,
        /// Count a block in today's lockout statistics
        #[arg(long)]
        report: bool,
    },
    /// Record a focused visit of the given length
    Visit {
        url: String,
        /// Minutes spent on the page
        #[arg(long)]
        minutes: f64,
    },
    /// Run the daily rollover now
    Reset,
    /// Lockout statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Run the coordinator over JSON lines on stdin/stdout
    Serve,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CAILO_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Rule { action } => commands::rule::run(action),
        Commands::Enable => commands::toggle::set_enabled(true),
        Commands::Disable => commands::toggle::set_enabled(false),
        Commands::Mode { mode } => commands::toggle::set_mode(mode),
        Commands::Status { json } => commands::status::run(json),
        Commands::Check { url, report } => commands::check::run(&url, report),
        Commands::Visit { url, minutes } => commands::visit::run(&url, minutes),
        Commands::Reset => commands::reset::run(),
        Commands::Stats { json } => commands::stats::run(json),
        Commands::Config { action } => commands::config::run(action),
        Commands::Serve => commands::serve::run(),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
