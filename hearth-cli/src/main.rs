//! Hearth — network configuration discovery daemon and clients.
//!
//! # Usage
//!
//! ```text
//! hearth serve start [--fg] [--pidfile FILE] [--cookie C] [--interface IF]
//! hearth serve stop|restart|status --pidfile FILE
//! hearth query [--cookie C] [--window SECS]
//! hearth info [--interface IF]
//! hearth send <ping|config|stop> [--host H] [--port P]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{info::InfoArgs, query::QueryArgs, send::SendArgs, serve::ServeCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "hearth",
    version,
    about = "Broadcast and discover host network configuration over the LAN",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the configuration discovery daemon.
    Serve {
        #[command(subcommand)]
        command: ServeCommand,
    },

    /// Broadcast a discovery query and print the collected replies.
    Query(QueryArgs),

    /// Print this host's network configuration.
    Info(InfoArgs),

    /// Send one command to a running daemon's control channel.
    Send(SendArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { command } => commands::serve::run(command),
        Commands::Query(args) => args.run(),
        Commands::Info(args) => args.run(),
        Commands::Send(args) => args.run(),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Diagnostics go to stderr so command output stays parseable.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
