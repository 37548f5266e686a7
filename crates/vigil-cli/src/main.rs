mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use vigil_core::config::get_data_dir;

use commands::{config::ConfigAction, pin::PinAction};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Presence guard for timed study sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a study session
    Start {
        /// Session length in minutes
        #[arg(short, long)]
        minutes: u32,
        /// Name used in spoken alerts
        #[arg(short, long)]
        name: Option<String>,
    },
    /// End the session early (requires the PIN)
    Stop {
        #[arg(short, long)]
        pin: String,
    },
    /// Show the session and, when the daemon runs, live presence
    Status,
    /// Show the incident history
    History {
        /// Only show the newest N entries
        #[arg(short, long)]
        limit: Option<usize>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the incident history (requires the PIN)
    ClearHistory {
        #[arg(short, long)]
        pin: String,
    },
    /// Manage the parental PIN
    Pin {
        #[command(subcommand)]
        action: PinAction,
    },
    /// Forward a platform signal (hidden, visible, blur, focus, pagehide,
    /// pageshow, beforeunload) to the running daemon
    Signal { name: String },
    /// Run the guard in the foreground
    Watch,
    /// Stop a running `watch`
    Shutdown,
    /// Ring a study reminder at a time of day until you show up
    Remind {
        /// Time of day, 24-hour HH:MM
        #[arg(long)]
        at: String,
        /// Keep ringing this many minutes at most; 0 rings until acknowledged
        #[arg(short, long)]
        minutes: Option<u32>,
    },
    /// Replay a timed signal script against a simulated clock
    Simulate {
        /// Script file, or an inline script such as "hidden@0 visible@5000"
        script: String,
        /// Simulated session length in seconds
        #[arg(long, default_value = "1800")]
        session_secs: u32,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let data_dir = get_data_dir()?;

    match cli.command {
        Commands::Start { minutes, name } => commands::session::start(minutes, name.as_deref()),
        Commands::Stop { pin } => commands::session::stop(&data_dir, &pin).await,
        Commands::Status => commands::session::show_status(&data_dir).await,
        Commands::History { limit, json } => commands::history::show_history(limit, json),
        Commands::ClearHistory { pin } => commands::history::clear_history(&pin),
        Commands::Pin { action } => commands::pin::handle_pin_command(action),
        Commands::Signal { name } => commands::daemon::send_signal(&data_dir, &name).await,
        Commands::Watch => commands::daemon::watch().await,
        Commands::Shutdown => commands::daemon::shutdown(&data_dir).await,
        Commands::Remind { at, minutes } => commands::remind::remind(&at, minutes).await,
        Commands::Simulate {
            script,
            session_secs,
        } => commands::simulate::handle_simulate(&script, session_secs),
        Commands::Config { action } => commands::config::handle_config_command(action),
    }
}
