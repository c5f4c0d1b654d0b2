//! Service registry
//!
//! The registry answers one question for the whole bench: which control
//! servers are alive right now, and where do I reach them. Control servers
//! register themselves with a lease and keep it renewed; proxies resolve a
//! service type to a live endpoint. The registry server itself sits on one
//! fixed, configured endpoint (it cannot be discovered through itself).

use serde::Serialize;

mod client;
mod monitor;
mod server;
mod store;

pub use client::{RegistrationHandle, RegistryClient, ServiceRegistration};
pub use monitor::HeartbeatMonitor;
pub use server::RegistryServer;
pub use store::{NewRegistration, RegistrationRecord, RegistryStore};

use crate::command::CommandSchema;
use crate::error::SchemaResult;

/// Default port for the registry server's request endpoint
pub const DEFAULT_REGISTRY_PORT: u16 = 4242;

/// Error kind on replies for a renew/deregister of an unknown or expired id
pub const KIND_UNKNOWN_REGISTRATION: &str = "unknown_registration";
/// Error kind on replies for a lookup with no live record
pub const KIND_NOT_FOUND: &str = "not_found";
/// Error kind on replies for a registration that failed validation
pub const KIND_INVALID_RECORD: &str = "invalid_record";

/// Notification published when the registry's state changes
///
/// Carried on a broadcast channel for observability (log followers, bench
/// monitors). Nothing in the control plane depends on delivery.
#[derive(Debug, Clone, Serialize)]
pub enum RegistryEvent {
    /// A service registered and obtained a new lease
    Registered(RegistrationRecord),
    /// A service deregistered explicitly
    Deregistered(RegistrationRecord),
    /// A lease expired and the record was evicted by the sweep
    Expired(RegistrationRecord),
}

// The registry speaks the same schema-driven protocol as every control
// server; this document is the single source of truth for its wire surface,
// shared by RegistryServer (dispatch) and RegistryClient (proxy).
const REGISTRY_SCHEMA: &str = r#"
{
    "register": {
        "description": "Register a service and obtain a lease",
        "cmd": "{service_type} {host} {port} {pid} {ttl} {metadata}",
        "returns": "service_id of the new registration"
    },
    "renew": {
        "description": "Extend the lease of a live registration",
        "cmd": "{service_id}"
    },
    "deregister": {
        "description": "Remove a registration immediately",
        "cmd": "{service_id}"
    },
    "lookup": {
        "description": "Resolve a service type to its most recently renewed live record",
        "cmd": "{service_type}",
        "returns": "registration record"
    },
    "lookup_all": {
        "description": "All live records for a service type",
        "cmd": "{service_type}",
        "returns": "list of registration records"
    },
    "list": {
        "description": "All live registrations",
        "returns": "list of registration records"
    },
    "info": {
        "description": "Registry server status report"
    },
    "health": {
        "description": "Liveness check"
    }
}
"#;

/// Load the registry's built-in command schema.
pub fn registry_schema() -> SchemaResult<CommandSchema> {
    CommandSchema::load(REGISTRY_SCHEMA)
}
