//! Network substrate for hearth services.
//!
//! Three pieces share one design problem — turning a script into a
//! long-lived, controllable background service:
//! - [`frame`] — length-prefixed framing and JSON wire marshalling
//! - [`discovery`] — UDP broadcast request/reply for learning a host's
//!   network configuration without prior address knowledge
//! - [`command`] — TCP request/reply channel for controlling a running
//!   daemon, one command in flight at a time

pub mod command;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod netinfo;
pub mod wire;

pub use command::{
    CommandClient, CommandMessage, CommandServer, DEFAULT_CONTROL_PORT, DEFAULT_HOST,
};
pub use discovery::{
    DiscoveryClient, DiscoveryServer, DiscoveryServerConfig, QueryOptions,
    DEFAULT_QUERY_PORT, DEFAULT_RECV_WINDOW, DEFAULT_REPLY_PORT, DEFAULT_SEND_TIMEOUT,
};
pub use error::NetError;
pub use netinfo::{NetworkConfig, DEFAULT_IF_NAME};
pub use wire::{DiscoveryMessage, Reply, Request, WIRE_VERSION};
