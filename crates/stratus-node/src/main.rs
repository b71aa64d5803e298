//! Stratus node - serves cluster services over the binary RPC protocol.
//!
//! `serve` starts a node exposing `NodeInfo`, `ServiceRegistry` and
//! `CloudService`; `call` connects to a running node and queries or stops
//! its services.

mod services;

use anyhow::Result;
use clap::{Parser, Subcommand};
use services::{CloudService, NodeInfo, NodeSnapshot, ServiceRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use stratus_rpc::network::{NetworkClient, NetworkServer};
use stratus_rpc::{
    NetworkComponent, NetworkConfig, PacketListenerRegistry, RpcFactory, RpcHandlerRegistry,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "stratus-node")]
#[command(about = "Stratus cluster node")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a node
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Node name reported to callers
        #[arg(long, default_value = "node-1")]
        name: String,

        /// Services to host
        #[arg(long = "service", default_values = ["proxy", "lobby"])]
        services: Vec<String>,
    },
    /// Call a running node
    Call {
        /// Address of the node
        #[arg(long)]
        addr: SocketAddr,

        #[command(subcommand)]
        action: Action,
    },
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Show the node's identity
    Info,
    /// List running services
    Services,
    /// Stop a service
    Stop { service: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            port,
            host,
            name,
            services,
        } => serve(&host, port, name, services).await,
        Command::Call { addr, action } => call(addr, action).await,
    }
}

async fn serve(host: &str, port: u16, name: String, services: Vec<String>) -> Result<()> {
    info!("Starting Stratus node {}", name);

    let factory = RpcFactory::default();
    let registry = Arc::new(ServiceRegistry::new());
    for service in services {
        let service = registry.add(CloudService::new(service));
        info!(service = %service.name(), "Hosting service");
    }

    let handlers = Arc::new(RpcHandlerRegistry::new());
    handlers.register_handler(factory.new_handler_for(Some(Arc::new(NodeInfo::new(
        name,
        Arc::clone(&registry),
    )))));
    handlers.register_handler(factory.new_handler_for(Some(registry)));
    handlers.register_handler(factory.new_handler_for::<CloudService>(None));

    let listeners = Arc::new(PacketListenerRegistry::new());
    listeners.add_listener(
        NetworkConfig::RPC_CHANNEL,
        Arc::new(factory.new_packet_listener(handlers)),
    );

    let mut server = NetworkServer::bind(format!("{}:{}", host, port), listeners).await?;

    // Print port for scripts to read (intentional stdout)
    println!("NODE_PORT={}", server.addr().port());

    info!("Node running on {}", server.addr());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    server.shutdown();

    Ok(())
}

async fn call(addr: SocketAddr, action: Action) -> Result<()> {
    let factory = RpcFactory::default();
    let client = Arc::new(NetworkClient::connect(addr, Arc::new(PacketListenerRegistry::new())).await?);
    let component: Arc<dyn NetworkComponent> = client.clone();

    match action {
        Action::Info => {
            let node: NodeSnapshot = factory
                .new_sender_for::<NodeInfo>(Some(component))
                .invoke_method("info", ())?
                .fire()
                .await?;
            println!(
                "{} v{} up since {} ({} services)",
                node.name, node.version, node.started_at, node.services
            );
        }
        Action::Services => {
            let services: Vec<String> = factory
                .new_sender_for::<ServiceRegistry>(Some(component))
                .invoke_method("list", ())?
                .fire()
                .await?;
            for service in services {
                println!("{}", service);
            }
        }
        Action::Stop { service } => {
            let get = factory
                .new_sender_for::<ServiceRegistry>(Some(Arc::clone(&component)))
                .invoke_method("get", (service.clone(),))?;
            let stop = factory
                .new_sender_for::<CloudService>(Some(component))
                .invoke_method("stop", ())?;

            let stopped: bool = get.join(stop).fire().await?;
            if stopped {
                println!("Stopped {}", service);
            } else {
                warn!(service = %service, "Service not found or already stopped");
            }
        }
    }

    client.close();
    Ok(())
}
