//! `hearth query` — broadcast a discovery query and print the replies.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use hearth_net::{
    DiscoveryClient, QueryOptions, DEFAULT_QUERY_PORT, DEFAULT_REPLY_PORT,
};

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Keep only replies carrying this cookie.
    #[arg(long)]
    pub cookie: Option<String>,

    /// Reply-collection window in seconds. Zero collects until interrupted.
    #[arg(long, default_value_t = 1)]
    pub window: u64,

    /// UDP port queries are broadcast to.
    #[arg(long, default_value_t = DEFAULT_QUERY_PORT)]
    pub query_port: u16,

    /// UDP port replies arrive on.
    #[arg(long, default_value_t = DEFAULT_REPLY_PORT)]
    pub reply_port: u16,
}

impl QueryArgs {
    pub fn run(self) -> Result<()> {
        let options = QueryOptions {
            query_port: self.query_port,
            reply_port: self.reply_port,
            recv_window: Duration::from_secs(self.window),
            cookie: self.cookie,
            ..QueryOptions::default()
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build async runtime")?;
        let configs = runtime
            .block_on(DiscoveryClient::new(options).query())
            .context("discovery query failed")?;

        for (index, config) in configs.iter().enumerate() {
            if index > 0 {
                println!();
            }
            println!("{config}");
        }
        if !configs.is_empty() {
            println!();
        }
        println!("{} host(s) replied", configs.len());
        Ok(())
    }
}
