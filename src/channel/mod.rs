//! Transport channel between proxies and dispatchers
//!
//! Call and reply envelopes ride newline-delimited JSON over TCP. Two modes
//! exist: the point-to-point [`ClientChannel`] used by proxies (strict
//! request-then-reply per connection), and the multiplexed [`ChannelServer`]
//! used by control servers and the registry, where every inbound connection
//! carries a stable identity and replies are routed back by that identity
//! rather than by the order they were produced.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

mod client;
mod codec;
mod server;

pub use client::ClientChannel;
pub use server::{ChannelServer, ConnectionId, EnvelopeHandler};

/// Error kind on a reply to a command the schema does not know
pub const KIND_UNKNOWN_COMMAND: &str = "unknown_command";
/// Error kind on a reply to a call whose arguments failed validation
pub const KIND_INVALID_ARGUMENTS: &str = "invalid_arguments";
/// Error kind on a reply produced from a failed handler
pub const KIND_HANDLER_FAILURE: &str = "handler_failure";
/// Error kind on a reply to an envelope that could not be parsed
pub const KIND_PARSE_ERROR: &str = "parse_error";
/// Error kind on a reply the server could not produce for internal reasons
pub const KIND_INTERNAL_ERROR: &str = "internal_error";

/// A resolvable network endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The `host:port` form accepted by `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One command invocation on the wire
///
/// Created per call by a proxy, consumed by a dispatcher, never persisted.
/// The correlation token pairs the eventual reply with this call even when
/// the channel delivers replies out of order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Correlation token echoed by the reply
    pub token: Uuid,
    /// Command name from the schema
    pub command: String,
    /// Named arguments, or `Null` for commands without arguments
    #[serde(default)]
    pub args: Value,
}

impl CallEnvelope {
    /// Build an envelope with a fresh correlation token.
    pub fn new(command: impl Into<String>, args: Value) -> Self {
        Self {
            token: Uuid::new_v4(),
            command: command.into(),
            args,
        }
    }
}

/// The reply to a [`CallEnvelope`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Correlation token copied from the originating call
    pub token: Uuid,
    /// Result payload, present on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error descriptor, present on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReply>,
}

impl ReplyEnvelope {
    /// A successful reply carrying `result`.
    pub fn success(token: Uuid, result: Value) -> Self {
        Self {
            token,
            result: Some(result),
            error: None,
        }
    }

    /// An error reply carrying `error`.
    pub fn failure(token: Uuid, error: ErrorReply) -> Self {
        Self {
            token,
            result: None,
            error: Some(error),
        }
    }

    /// Whether this reply reports an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split the reply into its payload or its error descriptor.
    pub fn into_result(self) -> std::result::Result<Value, ErrorReply> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Error descriptor carried by an error reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Machine-readable error kind (snake_case)
    pub kind: String,
    /// Human-readable message
    pub message: String,
    /// Arbitrary structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorReply {
    /// An error reply with the given kind and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    /// The reply for a command name the dispatcher does not know.
    pub fn unknown_command(command: &str) -> Self {
        Self::new(
            KIND_UNKNOWN_COMMAND,
            format!("command '{command}' is not part of the schema"),
        )
    }

    /// The reply for arguments that failed validation.
    pub fn invalid_arguments(detail: impl Into<String>) -> Self {
        Self::new(KIND_INVALID_ARGUMENTS, detail)
    }

    /// The reply for an envelope the server could not parse.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(KIND_PARSE_ERROR, detail)
    }
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
