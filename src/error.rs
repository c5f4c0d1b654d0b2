//! Error types for the benchlink control plane
//!
//! We use thiserror for domain errors, one enum per subsystem, and split
//! failures into two propagation tiers: schema and binding errors are fatal
//! at process startup, everything else is a per-call value returned to the
//! immediate caller and never takes down a receive loop.

use std::io;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::channel::ErrorReply;

/// Command-schema loading errors
///
/// Detected once, when a schema is loaded; fatal to the process that loaded
/// it. A schema that passes `load` never produces these again.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Two entries share the same command name
    #[error("duplicate command '{0}' in schema")]
    DuplicateCommand(String),

    /// A command entry has an empty name
    #[error("command name must not be empty")]
    EmptyName,

    /// The argument template of a command could not be parsed
    #[error("invalid argument template for '{command}': {detail}")]
    BadTemplate {
        /// Command whose template failed to parse
        command: String,
        /// Description of the parse failure
        detail: String,
    },

    /// A template placeholder names a field missing from the declared
    /// argument list
    #[error("template for '{command}' references undeclared field '{field}'")]
    UndeclaredField {
        /// Command whose template is inconsistent
        command: String,
        /// The offending placeholder name
        field: String,
    },

    /// IO error while reading a schema source
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The schema source is not valid JSON of the expected shape
    #[error("schema syntax error: {0}")]
    Syntax(#[from] serde_json::Error),
}

/// Convenience result alias for schema operations
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// Dispatcher binding errors
///
/// Raised by `Dispatcher::bind` when the handler table does not cover every
/// method a schema requires. Detected at startup, never at call time.
#[derive(Debug, Error)]
pub enum BindingError {
    /// The handler table has no method with the name a command binds to
    #[error("handler table has no method '{method}' required by command '{command}'")]
    MissingMethod {
        /// Command that requires the method
        command: String,
        /// The missing method name
        method: String,
    },
}

/// Transport-channel errors
///
/// All recoverable at the call site; the channel layer never retries on its
/// own.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection attempt did not complete within the configured timeout
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Endpoint that was being connected to
        endpoint: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// The peer is unreachable or the socket failed while sending
    #[error("send failed: {0}")]
    SendFailure(String),

    /// No reply arrived within the caller's deadline
    #[error("no reply within {0:?}")]
    ReplyTimeout(Duration),

    /// A reply arrived but could not be decoded against the expected shape
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

/// Convenience result alias for channel operations
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registration request failed validation and was not stored
    #[error("invalid registration record: {0}")]
    InvalidRecord(String),

    /// The service id is unknown or its lease already expired; the caller
    /// must re-register to obtain a fresh id
    #[error("unknown registration {0}")]
    UnknownRegistration(Uuid),

    /// No live record for the requested service type; the service is
    /// currently unavailable, callers retry or surface it upward
    #[error("no live service of type '{0}'")]
    NotFound(String),

    /// Transport failure while talking to the registry server
    #[error("registry channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The registry server replied with an error this client cannot map
    #[error("registry error reply: {0}")]
    Remote(String),
}

/// Convenience result alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Per-call errors surfaced by a proxy
#[derive(Debug, Error)]
pub enum CallError {
    /// The command is not part of the proxy's schema
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// The supplied arguments do not match the command's template
    #[error("invalid arguments for '{command}': {detail}")]
    InvalidArguments {
        /// Command whose arguments were rejected
        command: String,
        /// Description of the mismatch
        detail: String,
    },

    /// The server answered with an error reply
    #[error("remote error: {0}")]
    Remote(ErrorReply),

    /// Transport failure underneath the call
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Endpoint discovery through the registry failed
    #[error("discovery failed: {0}")]
    Discovery(#[from] RegistryError),
}

/// Convenience result alias for proxy calls
pub type CallResult<T> = std::result::Result<T, CallError>;

/// Failure raised by a bound handler method
///
/// Converted by the dispatcher into an error reply; never propagated to the
/// transport layer. `kind` overrides the reply's error kind so services can
/// expose typed failures (the registry server uses this for
/// `unknown_registration` and friends).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerFailure {
    /// Optional error kind for the reply; defaults to `handler_failure`
    pub kind: Option<String>,
    /// Human-readable cause
    pub message: String,
}

impl HandlerFailure {
    /// A plain handler failure with the default kind.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
        }
    }

    /// A handler failure carrying an explicit error kind.
    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            message: message.into(),
        }
    }
}

impl From<String> for HandlerFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Top-level crate error
#[derive(Debug, Error)]
pub enum Error {
    /// Schema loading error
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Dispatcher binding error
    #[error("binding error: {0}")]
    Binding(#[from] BindingError),

    /// Transport-channel error
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Proxy call error
    #[error("call error: {0}")]
    Call(#[from] CallError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type using the top-level [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
