//! Network-facing registry server
//!
//! The registry's wire operations are served by the same dispatcher
//! machinery every control server uses, bound to the built-in registry
//! schema over a multiplexed channel. One long-lived process, one fixed
//! well-known endpoint from configuration.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::ToSocketAddrs;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::monitor::HeartbeatMonitor;
use super::store::{NewRegistration, RegistryStore};
use super::{registry_schema, RegistryEvent, KIND_INVALID_RECORD, KIND_NOT_FOUND, KIND_UNKNOWN_REGISTRATION};
use crate::channel::{ChannelServer, Endpoint};
use crate::command::{ArgValues, Dispatcher, HandlerTable};
use crate::config::CoreConfig;
use crate::error::{HandlerFailure, RegistryError, Result};

/// The registry service: store, sweep task, and network endpoint
pub struct RegistryServer {
    store: Arc<RegistryStore>,
    server: ChannelServer,
    monitor: HeartbeatMonitor,
    events: broadcast::Sender<RegistryEvent>,
}

impl RegistryServer {
    /// Start on the configured well-known registry port.
    pub async fn start(config: &CoreConfig) -> Result<Self> {
        Self::start_at(("0.0.0.0", config.registry.port), config).await
    }

    /// Start on an explicit address (port 0 picks an ephemeral port).
    pub async fn start_at<A: ToSocketAddrs>(addr: A, config: &CoreConfig) -> Result<Self> {
        let store = Arc::new(RegistryStore::new());
        let (events, _) = broadcast::channel(64);

        let schema = Arc::new(registry_schema()?);
        let table = handler_table(store.clone(), events.clone());
        let dispatcher = Dispatcher::bind(schema, table)?;

        let server = ChannelServer::bind(addr, Arc::new(dispatcher)).await?;
        let monitor = HeartbeatMonitor::spawn(store.clone(), config.sweep_interval, events.clone());

        tracing::info!(port = server.port(), "registry server started");
        Ok(Self {
            store,
            server,
            monitor,
            events,
        })
    }

    /// The port the server is listening on.
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// A loopback endpoint for this server, useful in tests.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port())
    }

    /// The underlying store.
    pub fn store(&self) -> Arc<RegistryStore> {
        self.store.clone()
    }

    /// Subscribe to registration lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Stop serving and sweeping.
    pub async fn shutdown(self) {
        self.monitor.shutdown();
        self.server.shutdown().await;
        tracing::info!("registry server shut down");
    }
}

fn handler_table(
    store: Arc<RegistryStore>,
    events: broadcast::Sender<RegistryEvent>,
) -> HandlerTable {
    let mut table = HandlerTable::new();

    {
        let store = store.clone();
        let events = events.clone();
        table.register("register", move |args| {
            let new = parse_registration(&args)?;
            tracing::info!(
                service_type = %new.service_type,
                endpoint = %format!("{}:{}", new.host, new.port),
                "registration request"
            );
            let record = store.register(new).map_err(registry_failure)?;
            let service_id = record.service_id;
            let _ = events.send(RegistryEvent::Registered(record));
            Ok(json!({ "service_id": service_id }))
        });
    }

    {
        let store = store.clone();
        table.register("renew", move |args| {
            let service_id = parse_service_id(&args)?;
            store.renew(service_id).map_err(registry_failure)?;
            Ok(json!({ "renewed": true }))
        });
    }

    {
        let store = store.clone();
        let events = events.clone();
        table.register("deregister", move |args| {
            let service_id = parse_service_id(&args)?;
            let record = store.deregister(service_id).map_err(registry_failure)?;
            tracing::info!(%service_id, service_type = %record.service_type, "deregistered");
            let _ = events.send(RegistryEvent::Deregistered(record));
            Ok(json!({ "deregistered": true }))
        });
    }

    {
        let store = store.clone();
        table.register("lookup", move |args| {
            let service_type = args.str("service_type")?;
            let record = store.lookup(service_type).map_err(registry_failure)?;
            encode(&record)
        });
    }

    {
        let store = store.clone();
        table.register("lookup_all", move |args| {
            let service_type = args.str("service_type")?;
            let records = store.lookup_all(service_type);
            Ok(json!({ "services": encode_all(&records)? }))
        });
    }

    {
        let store = store.clone();
        table.register("list", move |_args| {
            let records = store.list();
            Ok(json!({ "services": encode_all(&records)? }))
        });
    }

    {
        let store = store.clone();
        table.register("info", move |_args| {
            Ok(json!({
                "status": "ok",
                "version": crate::VERSION,
                "registrations": store.list().len(),
            }))
        });
    }

    table.register("health", move |_args| {
        Ok(json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    });

    table
}

fn parse_registration(args: &ArgValues) -> std::result::Result<NewRegistration, HandlerFailure> {
    let port = args.u64("port")?;
    let port = u16::try_from(port).map_err(|_| {
        HandlerFailure::with_kind(KIND_INVALID_RECORD, format!("port {port} out of range"))
    })?;
    let pid = args.u64("pid")?;
    let pid = u32::try_from(pid).map_err(|_| {
        HandlerFailure::with_kind(KIND_INVALID_RECORD, format!("pid {pid} out of range"))
    })?;
    let ttl = args.u64("ttl")?;

    Ok(NewRegistration {
        service_type: args.str("service_type")?.to_string(),
        host: args.str("host")?.to_string(),
        port,
        pid,
        ttl: std::time::Duration::from_secs(ttl),
        metadata: args.object("metadata")?.clone(),
    })
}

fn parse_service_id(args: &ArgValues) -> std::result::Result<Uuid, HandlerFailure> {
    let raw = args.str("service_id")?;
    Uuid::parse_str(raw)
        .map_err(|err| HandlerFailure::new(format!("invalid service_id '{raw}': {err}")))
}

fn registry_failure(err: RegistryError) -> HandlerFailure {
    match err {
        RegistryError::InvalidRecord(detail) => {
            HandlerFailure::with_kind(KIND_INVALID_RECORD, detail)
        }
        RegistryError::UnknownRegistration(id) => HandlerFailure::with_kind(
            KIND_UNKNOWN_REGISTRATION,
            format!("unknown registration {id}"),
        ),
        RegistryError::NotFound(service_type) => HandlerFailure::with_kind(
            KIND_NOT_FOUND,
            format!("no live service of type '{service_type}'"),
        ),
        other => HandlerFailure::new(other.to_string()),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> std::result::Result<Value, HandlerFailure> {
    serde_json::to_value(value)
        .map_err(|err| HandlerFailure::new(format!("encoding failed: {err}")))
}

fn encode_all<T: serde::Serialize>(values: &[T]) -> std::result::Result<Value, HandlerFailure> {
    encode(&values)
}
