//! `hearth serve` — lifecycle control for the discovery daemon.
//!
//! The daemon answers UDP discovery queries with this host's network
//! configuration and exposes a local TCP control channel for `hearth send`.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use hearth_daemon::{Daemon, DaemonError, DaemonOptions, StartOutcome};
use hearth_net::{
    netinfo, CommandServer, DiscoveryServer, DiscoveryServerConfig, DEFAULT_CONTROL_PORT,
    DEFAULT_HOST, DEFAULT_IF_NAME, DEFAULT_QUERY_PORT, DEFAULT_REPLY_PORT, NetworkConfig,
};

/// Column the `[ OK ]` / `[ FAILED ]` marker is aligned to.
const MSG_WIDTH: usize = 73;

/// How long each queue poll waits before re-checking the termination flag.
const QUEUE_POLL: Duration = Duration::from_millis(250);

const SERVICE_NAME: &str = "hearth-netconf";

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum ServeCommand {
    /// Start the discovery daemon.
    Start(StartArgs),
    /// Stop a running daemon.
    Stop(StopArgs),
    /// Stop a running daemon, then start it again.
    Restart(RestartArgs),
    /// Report whether the daemon is running.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StartArgs {
    /// Run in the foreground without detaching.
    #[arg(long)]
    pub fg: bool,

    /// Raise SIGSTOP once initialized, for an external supervisor.
    #[arg(long = "stop")]
    pub raise_stop: bool,

    /// PID file location. Required unless --fg.
    #[arg(long, value_name = "FILE")]
    pub pidfile: Option<PathBuf>,

    /// Stdin redirection target for the detached daemon.
    #[arg(long, default_value = "/dev/stdin")]
    pub stdin: PathBuf,

    /// Stdout redirection target for the detached daemon.
    #[arg(long, default_value = "/dev/null")]
    pub stdout: PathBuf,

    /// Stderr redirection target for the detached daemon.
    #[arg(long, default_value = "/dev/null")]
    pub stderr: PathBuf,

    /// Tag stamped on every discovery reply. Defaults to the hostname.
    #[arg(long)]
    pub cookie: Option<String>,

    /// Interface whose configuration is served.
    #[arg(long, default_value = DEFAULT_IF_NAME)]
    pub interface: String,

    /// UDP port discovery queries arrive on.
    #[arg(long, default_value_t = DEFAULT_QUERY_PORT)]
    pub query_port: u16,

    /// UDP port discovery replies are broadcast to.
    #[arg(long, default_value_t = DEFAULT_REPLY_PORT)]
    pub reply_port: u16,

    /// TCP port of the local control channel.
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    pub control_port: u16,

    /// Print a one-line status report for the action.
    #[arg(long)]
    pub show_info: bool,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// PID file of the running daemon.
    #[arg(long, value_name = "FILE")]
    pub pidfile: PathBuf,

    /// Seconds between SIGTERM and SIGKILL.
    #[arg(long, default_value_t = 2)]
    pub grace: u64,

    /// Print a one-line status report for the action.
    #[arg(long)]
    pub show_info: bool,
}

#[derive(Args, Debug)]
pub struct RestartArgs {
    #[command(flatten)]
    pub start: StartArgs,

    /// Seconds between SIGTERM and SIGKILL when stopping.
    #[arg(long, default_value_t = 2)]
    pub grace: u64,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// PID file of the running daemon.
    #[arg(long, value_name = "FILE")]
    pub pidfile: PathBuf,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(command: ServeCommand) -> Result<()> {
    match command {
        ServeCommand::Start(args) => {
            let daemon = build_daemon(&args)?;
            let mut report = StatusLine::open("starting", args.show_info);
            start(&daemon, args, &mut report)
        }
        ServeCommand::Stop(args) => {
            let daemon = Daemon::new(DaemonOptions::new(&args.pidfile));
            let mut report = StatusLine::open("stopping", args.show_info);
            daemon
                .stop(Duration::from_secs(args.grace))
                .context("failed to stop daemon")?;
            report.close(true);
            Ok(())
        }
        ServeCommand::Restart(args) => {
            let daemon = build_daemon(&args.start)?;
            let mut report = StatusLine::open("restarting", args.start.show_info);
            daemon
                .stop(Duration::from_secs(args.grace))
                .context("failed to stop daemon")?;
            start(&daemon, args.start, &mut report)
        }
        ServeCommand::Status(args) => {
            let daemon = Daemon::new(DaemonOptions::new(&args.pidfile));
            match daemon.status() {
                Some(pid) => println!("running with PID {pid}"),
                None => println!("not running"),
            }
            Ok(())
        }
    }
}

fn build_daemon(args: &StartArgs) -> Result<Daemon> {
    let pidfile = match &args.pidfile {
        Some(path) => path.clone(),
        None => {
            if !args.fg {
                bail!("--pidfile is required unless --fg is given");
            }
            std::env::temp_dir().join(format!("{SERVICE_NAME}.pid"))
        }
    };

    let mut options = DaemonOptions::new(pidfile);
    options.foreground = args.fg;
    options.raise_stop = args.raise_stop;
    options.stdin = args.stdin.clone();
    options.stdout = args.stdout.clone();
    options.stderr = args.stderr.clone();
    Ok(Daemon::new(options))
}

fn start(daemon: &Daemon, args: StartArgs, report: &mut StatusLine) -> Result<()> {
    let cookie = args.cookie.clone().or_else(netinfo::hostname);

    let run_args = args.clone();
    let run_cookie = cookie.clone();

    // The report is closed inside `init`: in detached mode that is the only
    // process still attached to the caller's terminal at that point.
    let outcome = daemon.start(
        || {
            info!(cookie = cookie.as_deref().unwrap_or("-"), "daemon initialized");
            report.close(true);
            Ok(())
        },
        move || serve_blocking(run_args, run_cookie),
    );

    match outcome {
        Ok(StartOutcome::Finished | StartOutcome::Parent) => {
            report.close(true);
            Ok(())
        }
        Err(err) => {
            report.close(false);
            Err(err).context("failed to start daemon")
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon body
// ---------------------------------------------------------------------------

/// Control commands accepted over the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlCommand {
    Ping,
    Config,
    Stop,
}

impl ControlCommand {
    fn parse(payload: &Value) -> Option<Self> {
        match payload.as_str()? {
            "ping" => Some(Self::Ping),
            "config" => Some(Self::Config),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Build the runtime inside the daemonized process; forking an already
/// running runtime is not sound, so the fork happens first.
fn serve_blocking(args: StartArgs, cookie: Option<String>) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::runtime)?;
    runtime.block_on(serve(args, cookie))
}

async fn serve(args: StartArgs, cookie: Option<String>) -> Result<(), DaemonError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let discovery = DiscoveryServer::new(DiscoveryServerConfig {
        query_port: args.query_port,
        reply_port: args.reply_port,
        if_name: args.interface.clone(),
        cookie,
        ..DiscoveryServerConfig::default()
    });
    let discovery_task = tokio::spawn(discovery.run(shutdown_rx));

    let mut commands = CommandServer::bind((DEFAULT_HOST, args.control_port))
        .await
        .map_err(DaemonError::runtime)?;

    info!(control_port = args.control_port, "daemon running");

    loop {
        if hearth_daemon::termination_requested() {
            info!("termination requested; shutting down");
            break;
        }
        if discovery_task.is_finished() {
            break;
        }

        let message = match commands.recv_timeout(QUEUE_POLL).await {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            // The accept loop is gone; polling again would spin.
            Err(err) => {
                warn!(error = %err, "command channel lost; shutting down");
                let _ = shutdown_tx.send(true);
                return Err(DaemonError::runtime(err));
            }
        };

        let command = ControlCommand::parse(message.payload());
        info!(peer = %message.peer(), command = ?command, "control command");

        let sent = match command {
            Some(ControlCommand::Ping) => message.send_reply(json!("pong")).await,
            Some(ControlCommand::Config) => match NetworkConfig::gather(&args.interface) {
                Ok(config) => match serde_json::to_value(&config) {
                    Ok(value) => message.send_reply(value).await,
                    Err(err) => message.send_error(err).await,
                },
                Err(err) => message.send_error(err).await,
            },
            Some(ControlCommand::Stop) => {
                let sent = message.send_reply(json!("stopping")).await;
                if let Err(err) = sent {
                    warn!(error = %err, "failed to deliver reply");
                }
                break;
            }
            None => {
                let error = format!("unknown command: {}", message.payload());
                message.send_error(error).await
            }
        };
        if let Err(err) = sent {
            warn!(error = %err, "failed to deliver reply");
        }
    }

    let _ = shutdown_tx.send(true);
    match discovery_task.await {
        Ok(result) => result.map_err(DaemonError::runtime)?,
        Err(err) => return Err(DaemonError::runtime(err)),
    }
    commands.shutdown().await.map_err(DaemonError::runtime)?;

    info!("daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Status reporting
// ---------------------------------------------------------------------------

/// One-line `* hearth-netconf: starting ... [ OK ]` report, printed only
/// when `--show-info` is given.
struct StatusLine {
    active: bool,
}

impl StatusLine {
    fn open(action: &str, enabled: bool) -> Self {
        if !enabled {
            return Self { active: false };
        }
        let line = format!(" * {SERVICE_NAME}: {action}");
        print!("{line}{}", " ".repeat(MSG_WIDTH.saturating_sub(line.len())));
        let _ = std::io::stdout().flush();
        Self { active: true }
    }

    fn close(&mut self, ok: bool) {
        if self.active {
            println!("[ {} ]", if ok { "OK" } else { "FAILED" });
            self.active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_commands_parse_from_strings() {
        assert_eq!(ControlCommand::parse(&json!("ping")), Some(ControlCommand::Ping));
        assert_eq!(
            ControlCommand::parse(&json!("config")),
            Some(ControlCommand::Config)
        );
        assert_eq!(ControlCommand::parse(&json!("stop")), Some(ControlCommand::Stop));
    }

    #[test]
    fn unknown_or_non_string_commands_are_rejected() {
        assert_eq!(ControlCommand::parse(&json!("reboot")), None);
        assert_eq!(ControlCommand::parse(&json!(42)), None);
        assert_eq!(ControlCommand::parse(&json!({"cmd": "ping"})), None);
    }
}
