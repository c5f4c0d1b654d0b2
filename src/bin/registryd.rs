//! registryd – service registry daemon
//!
//! Provides subcommands for running the registry server and querying its
//! status from the command line.

use benchlink::channel::Endpoint;
use benchlink::registry::{RegistryClient, RegistryServer, DEFAULT_REGISTRY_PORT};
use benchlink::CoreConfig;
use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "registryd")]
#[command(about = "Service registry for the benchlink control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registry server
    Start {
        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_REGISTRY_PORT)]
        port: u16,

        /// Seconds between eviction sweeps
        #[arg(long, default_value_t = 10)]
        sweep_interval: u64,
    },

    /// Query a running registry server
    Status {
        /// Registry host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Registry port
        #[arg(long, default_value_t = DEFAULT_REGISTRY_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            port,
            sweep_interval,
        } => {
            let config = CoreConfig {
                registry: Endpoint::new("127.0.0.1", port),
                sweep_interval: Duration::from_secs(sweep_interval.max(1)),
                ..CoreConfig::default()
            };

            let server = RegistryServer::start(&config).await?;
            println!("Registry server listening on port {}", server.port());

            tokio::signal::ctrl_c().await?;
            println!("Termination signal received, shutting down");
            server.shutdown().await;
        }

        Commands::Status { host, port } => {
            let config = CoreConfig {
                registry: Endpoint::new(host, port),
                ..CoreConfig::default()
            };
            let client = RegistryClient::new(&config);

            match client.info().await {
                Ok(info) => {
                    println!("Registry Service:");
                    println!(
                        "    Status: {}",
                        info.get("status").and_then(|v| v.as_str()).unwrap_or("?")
                    );
                    println!(
                        "    Version: {}",
                        info.get("version").and_then(|v| v.as_str()).unwrap_or("?")
                    );
                    println!(
                        "    Registrations: {}",
                        info.get("registrations")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0)
                    );
                    for record in client.list().await.unwrap_or_default() {
                        println!(
                            "        {} {} {}",
                            record.service_type,
                            record.endpoint(),
                            record.service_id
                        );
                    }
                }
                Err(_) => {
                    println!("Registry Service: not active");
                }
            }
        }
    }

    Ok(())
}
