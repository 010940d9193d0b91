//! `hearth send` — one-shot client for a daemon's control channel.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Value};

use hearth_net::{CommandClient, DEFAULT_CONTROL_PORT, DEFAULT_HOST};

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Command to deliver: ping, config, or stop.
    pub command: String,

    /// Host the daemon's control channel listens on.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Control channel port.
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    pub port: u16,
}

impl SendArgs {
    pub fn run(self) -> Result<()> {
        let client = CommandClient::new(self.host, self.port);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build async runtime")?;
        let reply = runtime
            .block_on(client.send(json!(self.command)))
            .with_context(|| format!("command '{}' failed", self.command))?;

        match reply {
            Value::String(text) => println!("{text}"),
            other => println!(
                "{}",
                serde_json::to_string_pretty(&other).context("failed to render reply")?
            ),
        }
        Ok(())
    }
}
