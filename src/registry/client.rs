//! Registry client
//!
//! Used from both sides of the control plane: control servers register
//! themselves and keep the lease renewed through
//! [`RegistryClient::register_and_maintain`]; proxies resolve a service
//! type to a live endpoint through [`RegistryClient::resolve`]. The
//! client speaks the registry's own command schema over a point-to-point
//! channel to the configured bootstrap endpoint.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::store::RegistrationRecord;
use super::{registry_schema, KIND_INVALID_RECORD, KIND_NOT_FOUND, KIND_UNKNOWN_REGISTRATION};
use crate::channel::Endpoint;
use crate::command::{ArgSet, CommandSchema, Proxy};
use crate::config::{CoreConfig, TimeoutConfig};
use crate::error::{CallError, RegistryError, RegistryResult};

/// What a control server registers itself as
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    /// Category the service is discovered under
    pub service_type: String,
    /// Host the service listens on
    pub host: String,
    /// Port the service listens on
    pub port: u16,
    /// Lease ttl; whole-second granularity on the wire
    pub ttl: Duration,
    /// Additional metadata stored alongside the registration
    pub metadata: Map<String, Value>,
}

impl ServiceRegistration {
    /// A registration with empty metadata.
    pub fn new(
        service_type: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        ttl: Duration,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            host: host.into(),
            port,
            ttl,
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Client for the registry server's wire operations
pub struct RegistryClient {
    endpoint: Endpoint,
    timeouts: TimeoutConfig,
    proxy: Proxy,
}

impl RegistryClient {
    /// A client for the configured bootstrap endpoint.
    pub fn new(config: &CoreConfig) -> Self {
        Self::for_endpoint(config.registry.clone(), config.timeouts())
    }

    /// A client for an explicit registry endpoint.
    pub fn for_endpoint(endpoint: Endpoint, timeouts: TimeoutConfig) -> Self {
        // The built-in schema is a compile-time constant checked by tests;
        // failing to parse it is a crate bug, not a runtime condition.
        let schema = Arc::new(registry_schema().expect("built-in registry schema is valid"));
        let proxy = Proxy::direct(schema, endpoint.clone(), timeouts);
        Self {
            endpoint,
            timeouts,
            proxy,
        }
    }

    /// The registry endpoint this client talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The schema describing the registry's wire operations.
    pub fn schema(&self) -> &CommandSchema {
        self.proxy.schema()
    }

    /// Register a service, returning its new service id.
    pub async fn register(&self, registration: &ServiceRegistration) -> RegistryResult<Uuid> {
        let args = ArgSet::new()
            .kwarg("service_type", registration.service_type.clone())
            .kwarg("host", registration.host.clone())
            .kwarg("port", registration.port as u64)
            .kwarg("pid", std::process::id() as u64)
            .kwarg("ttl", registration.ttl.as_secs().max(1))
            .kwarg("metadata", Value::Object(registration.metadata.clone()));

        let reply = self
            .proxy
            .call("register", args)
            .await
            .map_err(map_call_error)?;

        reply
            .get("service_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| RegistryError::Remote("register reply missing service_id".to_string()))
    }

    /// Extend the lease of `service_id`.
    pub async fn renew(&self, service_id: Uuid) -> RegistryResult<()> {
        self.proxy
            .call(
                "renew",
                ArgSet::new().kwarg("service_id", service_id.to_string()),
            )
            .await
            .map(|_| ())
            .map_err(|err| map_id_error(err, service_id))
    }

    /// Remove the registration for `service_id`.
    pub async fn deregister(&self, service_id: Uuid) -> RegistryResult<()> {
        self.proxy
            .call(
                "deregister",
                ArgSet::new().kwarg("service_id", service_id.to_string()),
            )
            .await
            .map(|_| ())
            .map_err(|err| map_id_error(err, service_id))
    }

    /// The most-recently-renewed live record for a service type.
    pub async fn lookup(&self, service_type: &str) -> RegistryResult<RegistrationRecord> {
        let reply = self
            .proxy
            .call(
                "lookup",
                ArgSet::new().kwarg("service_type", service_type.to_string()),
            )
            .await
            .map_err(|err| map_type_error(err, service_type))?;
        decode_record(reply)
    }

    /// All live records for a service type.
    pub async fn lookup_all(&self, service_type: &str) -> RegistryResult<Vec<RegistrationRecord>> {
        let reply = self
            .proxy
            .call(
                "lookup_all",
                ArgSet::new().kwarg("service_type", service_type.to_string()),
            )
            .await
            .map_err(|err| map_type_error(err, service_type))?;
        decode_records(reply)
    }

    /// Every live registration.
    pub async fn list(&self) -> RegistryResult<Vec<RegistrationRecord>> {
        let reply = self
            .proxy
            .call("list", ArgSet::new())
            .await
            .map_err(map_call_error)?;
        decode_records(reply)
    }

    /// Resolve a service type to a live endpoint.
    ///
    /// `NotFound` means "service currently unavailable", not a fatal
    /// condition: callers with lazy resolution retry on their next call.
    pub async fn resolve(&self, service_type: &str) -> RegistryResult<Endpoint> {
        Ok(self.lookup(service_type).await?.endpoint())
    }

    /// Whether the registry server answers its health check.
    pub async fn health(&self) -> bool {
        self.proxy.call("health", ArgSet::new()).await.is_ok()
    }

    /// The registry server's status report.
    pub async fn info(&self) -> RegistryResult<Value> {
        self.proxy
            .call("info", ArgSet::new())
            .await
            .map_err(map_call_error)
    }

    /// Register and keep the lease renewed in the background.
    ///
    /// The maintenance loop renews every `interval` (callers usually pass
    /// [`CoreConfig::renewal_interval_for`]). When a renewal fails with
    /// `UnknownRegistration` (the server-side lease already expired, say
    /// after a network partition) the loop re-registers for a fresh id
    /// instead of giving up, so a control server heals from an eviction it
    /// did not cause. Transport failures are logged and retried; the loop
    /// never exits on its own.
    pub async fn register_and_maintain(
        &self,
        registration: ServiceRegistration,
        interval: Duration,
    ) -> RegistrationHandle {
        let service_id = Arc::new(parking_lot::Mutex::new(None::<Uuid>));

        match self.register(&registration).await {
            Ok(id) => {
                tracing::info!(%id, service_type = %registration.service_type, "registered");
                *service_id.lock() = Some(id);
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    service_type = %registration.service_type,
                    "initial registration failed, retrying in background"
                );
            }
        }

        let task = spawn_maintenance(
            self.endpoint.clone(),
            self.timeouts,
            registration,
            interval,
            service_id.clone(),
        );

        RegistrationHandle {
            service_id,
            endpoint: self.endpoint.clone(),
            timeouts: self.timeouts,
            task,
        }
    }
}

fn spawn_maintenance(
    endpoint: Endpoint,
    timeouts: TimeoutConfig,
    registration: ServiceRegistration,
    interval: Duration,
    service_id: Arc<parking_lot::Mutex<Option<Uuid>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = RegistryClient::for_endpoint(endpoint, timeouts);
        loop {
            tokio::time::sleep(interval).await;

            let current = *service_id.lock();
            match current {
                None => match client.register(&registration).await {
                    Ok(id) => {
                        tracing::info!(%id, service_type = %registration.service_type, "registered");
                        *service_id.lock() = Some(id);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "registration failed, will retry");
                    }
                },
                Some(id) => match client.renew(id).await {
                    Ok(()) => {
                        tracing::trace!(%id, "lease renewed");
                    }
                    Err(RegistryError::UnknownRegistration(_)) => {
                        tracing::warn!(%id, "lease evicted server-side, re-registering");
                        match client.register(&registration).await {
                            Ok(new_id) => {
                                tracing::info!(%new_id, "re-registered with fresh id");
                                *service_id.lock() = Some(new_id);
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "re-registration failed, will retry");
                                *service_id.lock() = None;
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, %id, "renewal failed, keeping lease");
                    }
                },
            }
        }
    })
}

/// Owner of a maintained lease
///
/// Dropping the handle stops the renewal loop without deregistering; the
/// lease then lapses on its own after one ttl.
pub struct RegistrationHandle {
    service_id: Arc<parking_lot::Mutex<Option<Uuid>>>,
    endpoint: Endpoint,
    timeouts: TimeoutConfig,
    task: JoinHandle<()>,
}

impl RegistrationHandle {
    /// The current service id, if a registration is live.
    ///
    /// Changes when the maintenance loop re-registers after an eviction.
    pub fn service_id(&self) -> Option<Uuid> {
        *self.service_id.lock()
    }

    /// Stop the renewal loop and remove the registration.
    pub async fn deregister(self) -> RegistryResult<()> {
        self.task.abort();
        let id = self.service_id.lock().take();
        match id {
            Some(id) => {
                let client = RegistryClient::for_endpoint(self.endpoint.clone(), self.timeouts);
                client.deregister(id).await
            }
            None => Ok(()),
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn map_call_error(err: CallError) -> RegistryError {
    match err {
        CallError::Remote(reply) => match reply.kind.as_str() {
            KIND_INVALID_RECORD => RegistryError::InvalidRecord(reply.message),
            _ => RegistryError::Remote(reply.to_string()),
        },
        CallError::Channel(err) => RegistryError::Channel(err),
        CallError::Discovery(err) => err,
        other => RegistryError::Remote(other.to_string()),
    }
}

fn map_id_error(err: CallError, service_id: Uuid) -> RegistryError {
    match &err {
        CallError::Remote(reply) if reply.kind == KIND_UNKNOWN_REGISTRATION => {
            RegistryError::UnknownRegistration(service_id)
        }
        _ => map_call_error(err),
    }
}

fn map_type_error(err: CallError, service_type: &str) -> RegistryError {
    match &err {
        CallError::Remote(reply) if reply.kind == KIND_NOT_FOUND => {
            RegistryError::NotFound(service_type.to_string())
        }
        _ => map_call_error(err),
    }
}

fn decode_record(value: Value) -> RegistryResult<RegistrationRecord> {
    serde_json::from_value(value)
        .map_err(|err| RegistryError::Remote(format!("undecodable registration record: {err}")))
}

fn decode_records(reply: Value) -> RegistryResult<Vec<RegistrationRecord>> {
    let services = reply
        .get("services")
        .cloned()
        .ok_or_else(|| RegistryError::Remote("reply missing services list".to_string()))?;
    serde_json::from_value(services)
        .map_err(|err| RegistryError::Remote(format!("undecodable registration records: {err}")))
}
