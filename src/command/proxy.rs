//! Client-side dynamic proxy
//!
//! A proxy binds a command schema to a transport channel and exposes one
//! callable per schema entry. Arguments are validated against the entry's
//! template before anything is sent; error replies and transport failures
//! surface as typed [`CallError`] values.
//!
//! Endpoint resolution follows the framework convention: a service
//! configured with port 0 is reached through the registry, a nonzero port
//! is a direct endpoint. Discovery is lazy and re-attempted after a
//! connection-level failure rather than cached forever, so a proxy
//! survives its peer being restarted on a new port.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::schema::CommandSchema;
use super::template::ArgSet;
use crate::channel::{CallEnvelope, ClientChannel, Endpoint};
use crate::config::TimeoutConfig;
use crate::error::{CallError, CallResult, ChannelError};
use crate::registry::RegistryClient;

enum Source {
    Direct(Endpoint),
    Discover {
        service_type: String,
        registry: Box<RegistryClient>,
    },
}

/// A schema-driven client for one remote service
pub struct Proxy {
    schema: Arc<CommandSchema>,
    source: Source,
    timeouts: TimeoutConfig,
    channel: Mutex<Option<ClientChannel>>,
}

impl Proxy {
    /// A proxy for a fixed endpoint, no registry involved.
    pub fn direct(schema: Arc<CommandSchema>, endpoint: Endpoint, timeouts: TimeoutConfig) -> Self {
        Self {
            schema,
            source: Source::Direct(endpoint),
            timeouts,
            channel: Mutex::new(None),
        }
    }

    /// A proxy that resolves its endpoint through the registry.
    pub fn discover(
        schema: Arc<CommandSchema>,
        service_type: impl Into<String>,
        registry: RegistryClient,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            schema,
            source: Source::Discover {
                service_type: service_type.into(),
                registry: Box::new(registry),
            },
            timeouts,
            channel: Mutex::new(None),
        }
    }

    /// Build a proxy from an endpoint configuration, applying the port-0
    /// convention: port 0 means "resolve via registry", a nonzero port is
    /// used directly.
    pub fn from_endpoint_config(
        schema: Arc<CommandSchema>,
        service_type: &str,
        host: &str,
        port: u16,
        registry: RegistryClient,
        timeouts: TimeoutConfig,
    ) -> Self {
        if port == 0 {
            Self::discover(schema, service_type, registry, timeouts)
        } else {
            Self::direct(schema, Endpoint::new(host, port), timeouts)
        }
    }

    /// The schema this proxy was bound from.
    pub fn schema(&self) -> &CommandSchema {
        &self.schema
    }

    /// The command names this proxy exposes.
    pub fn commands(&self) -> Vec<&str> {
        self.schema.names()
    }

    /// Invoke `command` with the default request deadline.
    pub async fn call(&self, command: &str, args: ArgSet) -> CallResult<Value> {
        self.call_with_deadline(command, args, self.timeouts.request)
            .await
    }

    /// Invoke `command`, waiting at most `deadline` for the reply.
    pub async fn call_with_deadline(
        &self,
        command: &str,
        args: ArgSet,
        deadline: Duration,
    ) -> CallResult<Value> {
        let entry = self
            .schema
            .get(command)
            .ok_or_else(|| CallError::UnknownCommand(command.to_string()))?;
        let payload = args.bind(entry.template.as_ref(), &entry.name)?;
        let envelope = CallEnvelope::new(&entry.name, payload);

        // Holding the lock across the round-trip gives the point-to-point
        // ordering guarantee: one call in flight per proxy.
        let mut guard = self.channel.lock().await;
        if guard.is_none() {
            *guard = Some(Box::pin(self.open_channel()).await?);
        }
        let channel = guard.as_ref().ok_or_else(|| {
            CallError::Channel(ChannelError::SendFailure("channel unavailable".to_string()))
        })?;

        match channel.call_with_deadline(&envelope, deadline).await {
            Ok(reply) => reply.into_result().map_err(CallError::Remote),
            Err(err) => {
                // A dead connection invalidates the cache; the next call
                // reconnects, re-resolving for discovered targets.
                if matches!(
                    err,
                    ChannelError::SendFailure(_) | ChannelError::ConnectTimeout { .. }
                ) {
                    *guard = None;
                }
                Err(CallError::Channel(err))
            }
        }
    }

    async fn open_channel(&self) -> CallResult<ClientChannel> {
        let endpoint = match &self.source {
            Source::Direct(endpoint) => endpoint.clone(),
            Source::Discover {
                service_type,
                registry,
            } => {
                let endpoint = registry.resolve(service_type).await?;
                tracing::debug!(%service_type, %endpoint, "resolved service endpoint");
                endpoint
            }
        };
        ClientChannel::connect(endpoint, self.timeouts)
            .await
            .map_err(CallError::Channel)
    }
}
