//! Error types for hearth-net.

use thiserror::Error;

/// All errors that can arise from framing, discovery, and the command channel.
#[derive(Debug, Error)]
pub enum NetError {
    /// Underlying socket or stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure for a wire payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame length prefix exceeded the configured limit.
    #[error("frame length {0} exceeds limit")]
    FrameTooLarge(usize),

    /// A decoded wire message carried an unsupported schema version.
    #[error("unsupported wire version {found}")]
    WireVersion { found: u8 },

    /// A command-channel reply did not decode as the expected envelope.
    #[error("received malformed reply")]
    MalformedReply,

    /// The remote side answered a command with an error description.
    #[error("remote error: {0}")]
    Remote(String),

    /// A bounded wait elapsed before the operation completed.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Reading a property of a local network interface failed.
    #[error("interface {name}: {message}")]
    Interface { name: String, message: String },

    /// The accept loop exited while commands were still being awaited.
    #[error("command listener stopped")]
    ListenerStopped,

    /// A background listener task panicked or was cancelled.
    #[error("listener task join failure: {0}")]
    TaskJoin(String),
}
