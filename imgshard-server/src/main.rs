mod config;

#[macro_use]
extern crate tracing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use imgshard::cache::{
    FetchConfig,
    FetchCoordinator,
    HttpOrigin,
    NodeCache,
    WorkerState,
    WorkerStatistics,
};
use imgshard::gateway::{GatewayDispatcher, HttpWorkerClient, WorkerClientConfig};
use imgshard::node::{
    ConnectionConfig,
    MembershipBuilder,
    MembershipService,
    NodeRole,
    SecretKey,
};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Command, GatewayArgs, NodeArgs, WorkerArgs};

/// How long a stopping node gives gossip to carry its departure.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Args = Args::parse();
    match args.command {
        Command::Worker(args) => run_worker(args).await,
        Command::Gateway(args) => run_gateway(args).await,
    }
}

async fn run_worker(args: WorkerArgs) -> Result<()> {
    let membership = join(&args.node, NodeRole::Worker).await?;

    let statistics = WorkerStatistics::default();
    let origin = HttpOrigin::new(Duration::from_secs(args.origin_timeout_secs))?;
    let coordinator = FetchCoordinator::new(
        NodeCache::new(),
        origin,
        FetchConfig {
            single_flight: args.single_flight,
        },
        statistics.clone(),
    );
    let state = WorkerState::new(coordinator, Arc::new(membership.clone()), statistics);

    serve(imgshard::cache::router(state), args.node.http_addr, membership).await
}

async fn run_gateway(args: GatewayArgs) -> Result<()> {
    let membership = join(&args.node, NodeRole::Gateway).await?;

    let client = HttpWorkerClient::new(WorkerClientConfig {
        timeout: Duration::from_secs(args.worker_timeout_secs),
    })?;
    let dispatcher = GatewayDispatcher::new(Arc::new(membership.clone()), client);

    serve(imgshard::gateway::router(dispatcher), args.node.http_addr, membership).await
}

async fn join(args: &NodeArgs, role: NodeRole) -> Result<MembershipService> {
    let secret = SecretKey::from_base64(&args.secret).context("Invalid cluster secret")?;

    let advertise_ip = args.advertise_ip();
    let public_addr = SocketAddr::new(advertise_ip, args.gossip_addr.port());
    let service_addr = SocketAddr::new(advertise_ip, args.http_addr.port());
    let node_id = args.node_id(public_addr);

    let connection_cfg =
        ConnectionConfig::new(args.gossip_addr, public_addr, service_addr, args.seeds());

    info!(
        node_id = %node_id,
        role = %role,
        gossip_addr = %public_addr,
        service_addr = %service_addr,
        "Joining cluster.",
    );
    let membership = MembershipBuilder::new(node_id, role, connection_cfg, secret)
        .join()
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to join the cluster.");
            e
        })?;

    Ok(membership)
}

async fn serve(app: Router, addr: SocketAddr, membership: MembershipService) -> Result<()> {
    let res = run_http(app, addr).await;

    info!("Leaving cluster.");
    if let Err(e) = membership.leave(LEAVE_TIMEOUT).await {
        warn!(error = %e, "Failed to leave the cluster cleanly.");
    }

    res
}

async fn run_http(app: Router, addr: SocketAddr) -> Result<()> {
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;

    info!("listening on {}", addr);
    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM.");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received.");
}
