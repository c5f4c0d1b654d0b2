//! Control-server scaffold
//!
//! Every hardware-controlling process follows the same lifecycle: bind a
//! dispatcher on a command port, register with the registry, keep the
//! lease renewed, serve until shut down, deregister on the way out.
//! [`ControlServer`] packages that lifecycle so a device server only
//! supplies its schema and handler table.
//!
//! Registration is best-effort: a control server that cannot reach the
//! registry keeps retrying in the background and keeps serving direct
//! (non-registry) calls; it does not exit.

use std::sync::Arc;
use uuid::Uuid;

use crate::channel::{ChannelServer, Endpoint};
use crate::command::{CommandSchema, Dispatcher, HandlerTable};
use crate::config::CoreConfig;
use crate::error::Result;
use crate::registry::{RegistrationHandle, RegistryClient, ServiceRegistration};

/// A serving control server
pub struct ControlServer {
    endpoint: Endpoint,
    server: ChannelServer,
    registration: Option<RegistrationHandle>,
}

impl ControlServer {
    /// Bind on `port` (0 picks an ephemeral port) and register with the
    /// configured registry.
    ///
    /// Schema/handler mismatches abort startup here, before any call is
    /// served. Registration failure does not: the maintenance loop keeps
    /// retrying while direct calls are already being answered.
    pub async fn serve(
        config: &CoreConfig,
        service_type: &str,
        port: u16,
        schema: Arc<CommandSchema>,
        table: HandlerTable,
    ) -> Result<Self> {
        let server = Self::bind(schema, table, port).await?;
        let endpoint = Endpoint::new(config.advertised_host.clone(), server.port());

        let registration = ServiceRegistration::new(
            service_type,
            endpoint.host.clone(),
            endpoint.port,
            config.default_ttl,
        );
        let client = RegistryClient::new(config);
        let interval = config.renewal_interval_for(config.default_ttl);
        let handle = client.register_and_maintain(registration, interval).await;

        tracing::info!(
            %service_type,
            %endpoint,
            service_id = ?handle.service_id(),
            "control server serving"
        );

        Ok(Self {
            endpoint,
            server,
            registration: Some(handle),
        })
    }

    /// Bind on a fixed `port` without registry involvement.
    ///
    /// For deployments where proxies are configured with a direct
    /// endpoint; the port must be nonzero to be reachable by convention.
    pub async fn serve_direct(
        config: &CoreConfig,
        port: u16,
        schema: Arc<CommandSchema>,
        table: HandlerTable,
    ) -> Result<Self> {
        let server = Self::bind(schema, table, port).await?;
        let endpoint = Endpoint::new(config.advertised_host.clone(), server.port());
        tracing::info!(%endpoint, "control server serving without registration");
        Ok(Self {
            endpoint,
            server,
            registration: None,
        })
    }

    async fn bind(schema: Arc<CommandSchema>, table: HandlerTable, port: u16) -> Result<ChannelServer> {
        let dispatcher = Dispatcher::bind(schema, table)?;
        let server = ChannelServer::bind(("0.0.0.0", port), Arc::new(dispatcher)).await?;
        Ok(server)
    }

    /// The endpoint this server advertises.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The port this server is listening on.
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// The current registration id, if a lease is live.
    pub fn service_id(&self) -> Option<Uuid> {
        self.registration.as_ref().and_then(|h| h.service_id())
    }

    /// Deregister and stop serving.
    pub async fn shutdown(self) {
        if let Some(handle) = self.registration {
            if let Err(err) = handle.deregister().await {
                tracing::warn!(error = %err, "deregistration failed during shutdown");
            }
        }
        self.server.shutdown().await;
    }
}
