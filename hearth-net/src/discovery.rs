//! UDP broadcast discovery protocol.
//!
//! A server answers "what is your network configuration?" queries by
//! broadcasting a fresh [`NetworkConfig`] snapshot; a client broadcasts one
//! query and collects the replies that arrive within a bounded window. No
//! central registry exists — every host can be server and client at once,
//! so the exchange must work without prior knowledge of peer addresses.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::frame;
use crate::netinfo::{NetworkConfig, DEFAULT_IF_NAME};
use crate::wire::DiscoveryMessage;

/// UDP port queries are broadcast to.
pub const DEFAULT_QUERY_PORT: u16 = 50000;
/// UDP port replies are broadcast to.
pub const DEFAULT_REPLY_PORT: u16 = 50001;
/// Default bound on sending the query datagram.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);
/// Default reply-collection window.
pub const DEFAULT_RECV_WINDOW: Duration = Duration::from_secs(1);

/// Discovery datagrams are small; anything larger is not ours.
const MAX_DATAGRAM_LEN: usize = 2048;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DiscoveryServerConfig {
    pub query_port: u16,
    pub reply_port: u16,
    /// Destination for reply datagrams. The limited broadcast address in
    /// production; loopback in tests.
    pub reply_addr: Ipv4Addr,
    pub if_name: String,
    /// Opaque tag stamped on every reply for client-side filtering.
    pub cookie: Option<String>,
}

impl Default for DiscoveryServerConfig {
    fn default() -> Self {
        Self {
            query_port: DEFAULT_QUERY_PORT,
            reply_port: DEFAULT_REPLY_PORT,
            reply_addr: Ipv4Addr::BROADCAST,
            if_name: DEFAULT_IF_NAME.to_owned(),
            cookie: None,
        }
    }
}

/// Answers discovery queries with the local interface configuration.
pub struct DiscoveryServer {
    config: DiscoveryServerConfig,
}

impl DiscoveryServer {
    pub fn new(config: DiscoveryServerConfig) -> Self {
        Self { config }
    }

    /// Listen for queries until the shutdown signal flips or the query
    /// socket fails unrecoverably. Malformed datagrams and interface-read
    /// failures never terminate the loop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), NetError> {
        let rx_sock =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.query_port)).await?;
        rx_sock.set_broadcast(true)?;
        let tx_sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        tx_sock.set_broadcast(true)?;

        info!(
            query_port = self.config.query_port,
            reply_port = self.config.reply_port,
            interface = %self.config.if_name,
            "discovery server listening"
        );

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.changed() => break,
                received = rx_sock.recv_from(&mut buf) => received?,
            };

            let message = frame::decode::<DiscoveryMessage>(&buf[..len])
                .and_then(DiscoveryMessage::validate);
            match message {
                Ok(DiscoveryMessage::Query { .. }) => {}
                Ok(_) => {
                    debug!(%peer, "ignoring non-query discovery datagram");
                    continue;
                }
                Err(err) => {
                    debug!(%peer, error = %err, "ignoring malformed discovery datagram");
                    continue;
                }
            }

            debug!(%peer, "received discovery query");

            // No partial replies: if any interface property cannot be read,
            // the whole response is abandoned for this query.
            let mut config = match NetworkConfig::gather(&self.config.if_name) {
                Ok(config) => config,
                Err(err) => {
                    warn!(
                        interface = %self.config.if_name,
                        error = %err,
                        "failed to gather interface configuration; dropping query"
                    );
                    continue;
                }
            };
            config.cookie = self.config.cookie.clone();

            let reply = frame::encode(&DiscoveryMessage::reply(config))?;
            tx_sock
                .send_to(&reply, (self.config.reply_addr, self.config.reply_port))
                .await?;
            debug!(reply_port = self.config.reply_port, "broadcast configuration reply");
        }

        info!("discovery server stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub query_port: u16,
    pub reply_port: u16,
    /// Destination for the query datagram.
    pub broadcast_addr: Ipv4Addr,
    pub send_timeout: Duration,
    /// Reply-collection window. Zero means collect until the socket fails
    /// or the caller cancels.
    pub recv_window: Duration,
    /// When set, only replies carrying an equal cookie are retained.
    pub cookie: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            query_port: DEFAULT_QUERY_PORT,
            reply_port: DEFAULT_REPLY_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            recv_window: DEFAULT_RECV_WINDOW,
            cookie: None,
        }
    }
}

/// Broadcasts one query and collects the replies arriving within the window.
pub struct DiscoveryClient {
    options: QueryOptions,
}

impl DiscoveryClient {
    pub fn new(options: QueryOptions) -> Self {
        Self { options }
    }

    /// Returns one snapshot of the configurations collected within the
    /// receive window, deduplicated by IP address and filtered by cookie.
    pub async fn query(&self) -> Result<Vec<NetworkConfig>, NetError> {
        // Bind the reply socket before sending so no early reply is lost.
        let rx_sock =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.options.reply_port)).await?;
        rx_sock.set_broadcast(true)?;

        let tx_sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        tx_sock.set_broadcast(true)?;

        let query = frame::encode(&DiscoveryMessage::query())?;
        debug!(query_port = self.options.query_port, "broadcasting discovery query");
        timeout(
            self.options.send_timeout,
            tx_sock.send_to(&query, (self.options.broadcast_addr, self.options.query_port)),
        )
        .await
        .map_err(|_| NetError::Timeout("discovery query send"))??;
        drop(tx_sock);

        let deadline = if self.options.recv_window.is_zero() {
            None
        } else {
            Some(Instant::now() + self.options.recv_window)
        };

        let mut collected = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let received = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, rx_sock.recv_from(&mut buf)).await
                    {
                        Ok(received) => received,
                        Err(_) => break, // window elapsed
                    }
                }
                None => rx_sock.recv_from(&mut buf).await,
            };

            let (len, peer) = match received {
                Ok(received) => received,
                Err(err) => {
                    debug!(error = %err, "reply socket error; ending collection");
                    break;
                }
            };

            match frame::decode::<DiscoveryMessage>(&buf[..len])
                .and_then(DiscoveryMessage::validate)
            {
                Ok(DiscoveryMessage::Reply { config, .. }) => {
                    debug!(%peer, interface = %config.if_name, "received configuration reply");
                    collect_reply(&mut collected, config, self.options.cookie.as_deref());
                }
                Ok(_) => debug!(%peer, "ignoring non-reply discovery datagram"),
                Err(err) => {
                    debug!(%peer, error = %err, "ignoring malformed discovery datagram");
                }
            }
        }

        Ok(collected)
    }
}

/// Fold one reply into the result set: deduplicate by IP address, then apply
/// the cookie filter. A repeated IP claiming a different hardware address is
/// a network inconsistency; it is logged and dropped rather than aborting
/// the collection.
fn collect_reply(
    collected: &mut Vec<NetworkConfig>,
    reply: NetworkConfig,
    cookie: Option<&str>,
) {
    if let Some(existing) = collected.iter().find(|entry| entry.ip_addr == reply.ip_addr) {
        if existing.hw_addr != reply.hw_addr {
            warn!(
                ip = ?reply.ip_addr,
                ours = ?existing.hw_addr,
                theirs = ?reply.hw_addr,
                "duplicate IP with conflicting hardware address; dropping reply"
            );
        }
        return;
    }

    if let Some(filter) = cookie {
        if reply.cookie.as_deref() != Some(filter) {
            return;
        }
    }

    collected.push(reply);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(ip: [u8; 4], mac: &str, cookie: Option<&str>) -> NetworkConfig {
        NetworkConfig {
            if_name: "eth0".to_owned(),
            ip_addr: Some(ip.into()),
            bcast_addr: None,
            netmask: None,
            gw_addr: None,
            hw_addr: Some(mac.to_owned()),
            cookie: cookie.map(str::to_owned),
        }
    }

    #[test]
    fn replies_are_deduplicated_by_ip() {
        let mut collected = Vec::new();
        collect_reply(&mut collected, reply([10, 0, 0, 1], "aa:aa", None), None);
        collect_reply(&mut collected, reply([10, 0, 0, 1], "aa:aa", None), None);
        collect_reply(&mut collected, reply([10, 0, 0, 2], "bb:bb", None), None);
        assert_eq!(collected.len(), 2);
    }

    #[test]
    fn duplicate_ip_with_conflicting_mac_is_dropped() {
        let mut collected = Vec::new();
        collect_reply(&mut collected, reply([10, 0, 0, 1], "aa:aa", None), None);
        collect_reply(&mut collected, reply([10, 0, 0, 1], "cc:cc", None), None);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].hw_addr.as_deref(), Some("aa:aa"));
    }

    #[test]
    fn cookie_filter_retains_only_matching_replies() {
        let mut collected = Vec::new();
        collect_reply(
            &mut collected,
            reply([10, 0, 0, 1], "aa:aa", Some("lab")),
            Some("lab"),
        );
        collect_reply(
            &mut collected,
            reply([10, 0, 0, 2], "bb:bb", Some("office")),
            Some("lab"),
        );
        collect_reply(&mut collected, reply([10, 0, 0, 3], "cc:cc", None), Some("lab"));
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].cookie.as_deref(), Some("lab"));
    }

    #[test]
    fn absent_cookie_filter_retains_everything() {
        let mut collected = Vec::new();
        collect_reply(
            &mut collected,
            reply([10, 0, 0, 1], "aa:aa", Some("lab")),
            None,
        );
        collect_reply(&mut collected, reply([10, 0, 0, 2], "bb:bb", None), None);
        assert_eq!(collected.len(), 2);
    }
}
