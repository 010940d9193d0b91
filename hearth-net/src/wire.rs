//! Versioned wire schema for discovery and command-channel messages.
//!
//! Every message carries an explicit schema version that is checked after
//! decode, so a peer speaking a different revision is treated as malformed
//! input instead of being trusted blindly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NetError;
use crate::netinfo::NetworkConfig;

/// Current wire schema revision.
pub const WIRE_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Discovery messages
// ---------------------------------------------------------------------------

/// One UDP discovery datagram: either a configuration query or a reply
/// carrying the responder's [`NetworkConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryMessage {
    Query { v: u8 },
    Reply { v: u8, config: NetworkConfig },
}

impl DiscoveryMessage {
    pub fn query() -> Self {
        Self::Query { v: WIRE_VERSION }
    }

    pub fn reply(config: NetworkConfig) -> Self {
        Self::Reply {
            v: WIRE_VERSION,
            config,
        }
    }

    fn version(&self) -> u8 {
        match self {
            Self::Query { v } | Self::Reply { v, .. } => *v,
        }
    }

    /// Reject messages from peers speaking a different schema revision.
    pub fn validate(self) -> Result<Self, NetError> {
        let found = self.version();
        if found != WIRE_VERSION {
            return Err(NetError::WireVersion { found });
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Command-channel envelopes
// ---------------------------------------------------------------------------

/// One command-channel request. The payload is opaque JSON owned by the
/// host tool; the channel itself only frames and versions it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    v: u8,
    payload: Value,
}

impl Request {
    pub fn new(payload: Value) -> Self {
        Self {
            v: WIRE_VERSION,
            payload,
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    pub fn validate(self) -> Result<Self, NetError> {
        if self.v != WIRE_VERSION {
            return Err(NetError::WireVersion { found: self.v });
        }
        Ok(self)
    }
}

/// One command-channel reply. Exactly one of payload/error is meaningful;
/// the constructors are the only way to build a reply, so a message can
/// never carry both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    v: u8,
    payload: Value,
    error: Option<String>,
}

impl Reply {
    pub fn ok(payload: Value) -> Self {
        Self {
            v: WIRE_VERSION,
            payload,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            v: WIRE_VERSION,
            payload: Value::Null,
            error: Some(message.into()),
        }
    }

    /// Check version and the payload/error exclusivity invariant on a reply
    /// decoded from the wire.
    pub fn validate(self) -> Result<Self, NetError> {
        if self.v != WIRE_VERSION {
            return Err(NetError::WireVersion { found: self.v });
        }
        if self.error.is_some() && !self.payload.is_null() {
            return Err(NetError::MalformedReply);
        }
        Ok(self)
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(message) => Err(message),
            None => Ok(self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discovery_query_roundtrip() {
        let bytes = crate::frame::encode(&DiscoveryMessage::query()).expect("encode");
        let decoded: DiscoveryMessage = crate::frame::decode(&bytes).expect("decode");
        let decoded = decoded.validate().expect("validate");
        assert!(matches!(decoded, DiscoveryMessage::Query { v: WIRE_VERSION }));
    }

    #[test]
    fn future_wire_version_is_rejected() {
        let raw = json!({ "kind": "query", "v": 99 });
        let decoded: DiscoveryMessage =
            serde_json::from_value(raw).expect("structurally valid");
        let err = decoded.validate().expect_err("must reject");
        assert!(matches!(err, NetError::WireVersion { found: 99 }));
    }

    #[test]
    fn reply_carries_payload_or_error_never_both() {
        let ok = Reply::ok(json!("hello"));
        assert_eq!(ok.into_result().expect("payload"), json!("hello"));

        let failed = Reply::error("boom");
        assert_eq!(failed.into_result().expect_err("error"), "boom");
    }

    #[test]
    fn reply_with_both_fields_is_malformed() {
        let raw = json!({ "v": 1, "payload": "data", "error": "boom" });
        let decoded: Reply = serde_json::from_value(raw).expect("structurally valid");
        let err = decoded.validate().expect_err("must reject");
        assert!(matches!(err, NetError::MalformedReply));
    }

    #[test]
    fn request_payload_is_opaque_json() {
        let request = Request::new(json!({ "cmd": "echo", "args": [1, 2, 3] }));
        let bytes = crate::frame::encode(&request).expect("encode");
        let decoded: Request = crate::frame::decode(&bytes).expect("decode");
        let decoded = decoded.validate().expect("validate");
        assert_eq!(decoded.payload()["cmd"], json!("echo"));
    }
}
