//! Local network-interface inspection.
//!
//! [`NetworkConfig`] is the unit of discovery: a snapshot of one interface's
//! addressing, produced fresh for every query and never persisted.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Interface inspected when none is named explicitly.
pub const DEFAULT_IF_NAME: &str = "eth0";

/// All properties of one network interface, plus an opaque cookie used by
/// discovery clients for filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub if_name: String,
    pub ip_addr: Option<Ipv4Addr>,
    pub bcast_addr: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub gw_addr: Option<Ipv4Addr>,
    pub hw_addr: Option<String>,
    pub cookie: Option<String>,
}

impl NetworkConfig {
    fn empty(if_name: &str) -> Self {
        Self {
            if_name: if_name.to_owned(),
            ip_addr: None,
            bcast_addr: None,
            netmask: None,
            gw_addr: None,
            hw_addr: None,
            cookie: None,
        }
    }

    /// Inspect `if_name` and return a fresh snapshot of its configuration.
    ///
    /// The inet entry contributes address/netmask/broadcast, the link-layer
    /// entry the MAC. An interface that exists but has no IPv4 address yields
    /// a config with `ip_addr: None` rather than an error.
    #[cfg(unix)]
    pub fn gather(if_name: &str) -> Result<Self, NetError> {
        use nix::ifaddrs::getifaddrs;

        let mut config = Self::empty(if_name);
        let mut found = false;

        let addrs = getifaddrs().map_err(|err| NetError::Interface {
            name: if_name.to_owned(),
            message: err.to_string(),
        })?;

        for entry in addrs {
            if entry.interface_name != if_name {
                continue;
            }
            found = true;

            let Some(address) = entry.address.as_ref() else {
                continue;
            };

            if let Some(sin) = address.as_sockaddr_in() {
                config.ip_addr = Some(sin.ip());
                config.netmask = entry
                    .netmask
                    .as_ref()
                    .and_then(|mask| mask.as_sockaddr_in())
                    .map(|sin| sin.ip());
                config.bcast_addr = entry
                    .broadcast
                    .as_ref()
                    .and_then(|bcast| bcast.as_sockaddr_in())
                    .map(|sin| sin.ip());
            } else if let Some(link) = address.as_link_addr() {
                if let Some(mac) = link.addr() {
                    config.hw_addr = Some(format_mac(&mac));
                }
            }
        }

        if !found {
            return Err(NetError::Interface {
                name: if_name.to_owned(),
                message: "no such interface".to_owned(),
            });
        }

        config.gw_addr = gateway_addr(if_name);
        Ok(config)
    }

    #[cfg(not(unix))]
    pub fn gather(if_name: &str) -> Result<Self, NetError> {
        Err(NetError::Interface {
            name: if_name.to_owned(),
            message: "interface inspection is only supported on unix".to_owned(),
        })
    }
}

impl fmt::Display for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map_or_else(|| "-".to_owned(), ToString::to_string)
        }

        writeln!(f, "if_name ....... {}", self.if_name)?;
        writeln!(f, "ip_addr ....... {}", opt(&self.ip_addr))?;
        writeln!(f, "bcast_addr .... {}", opt(&self.bcast_addr))?;
        writeln!(f, "netmask ....... {}", opt(&self.netmask))?;
        writeln!(f, "gw_addr ....... {}", opt(&self.gw_addr))?;
        writeln!(f, "hw_addr ....... {}", opt(&self.hw_addr))?;
        write!(f, "cookie ........ {}", opt(&self.cookie))
    }
}

/// Short hostname of the local machine, used as the default discovery cookie.
#[cfg(unix)]
pub fn hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
}

#[cfg(not(unix))]
pub fn hostname() -> Option<String> {
    None
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Default-route gateway for `if_name` from the kernel route table.
#[cfg(target_os = "linux")]
fn gateway_addr(if_name: &str) -> Option<Ipv4Addr> {
    let table = std::fs::read_to_string("/proc/net/route").ok()?;
    parse_route_table(&table, if_name)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn gateway_addr(_if_name: &str) -> Option<Ipv4Addr> {
    None
}

/// Parse `/proc/net/route` contents. Fields are hex-encoded 32-bit values in
/// little-endian byte order; the default route has destination `00000000`.
#[cfg(any(target_os = "linux", test))]
fn parse_route_table(table: &str, if_name: &str) -> Option<Ipv4Addr> {
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[0] != if_name || fields[1] != "00000000" {
            continue;
        }
        let raw = u32::from_str_radix(fields[2], 16).ok()?;
        if raw == 0 {
            continue;
        }
        return Some(Ipv4Addr::from(raw.to_le_bytes()));
    }
    None
}
