//! `hearth info` — report the local interface configuration.

use anyhow::{Context, Result};
use clap::Args;

use hearth_net::{NetworkConfig, DEFAULT_IF_NAME};

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Interface to inspect.
    #[arg(long, default_value = DEFAULT_IF_NAME)]
    pub interface: String,
}

impl InfoArgs {
    pub fn run(self) -> Result<()> {
        let config = NetworkConfig::gather(&self.interface)
            .with_context(|| format!("failed to inspect interface '{}'", self.interface))?;
        println!("{config}");
        Ok(())
    }
}
