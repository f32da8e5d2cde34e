//! # Dummy Operator
//!
//! A Kubernetes operator that reconciles `Dummy` custom resources and keeps one nginx pod per `Dummy` in sync.
//!
//! ## Overview
//!
//! This operator provides declarative pod management by:
//!
//! 1. **Watching Dummy resources** - Monitors `Dummy` custom resources in the `interview.com` group
//! 2. **Echoing spec to status** - Copies `spec.message` into `status.specEcho` on every pass
//! 3. **Child pod management** - Creates a same-named nginx pod for each `Dummy` and adopts pre-existing ones
//! 4. **Drift correction** - Repairs the pod image in place and recreates pods that grew extra containers
//! 5. **Finalizer cleanup** - Deletes the child pod before a `Dummy` is allowed to disappear
//!
//! ## Features
//!
//! - **Multi-namespace**: Watches `Dummy` resources across all namespaces (or one via `--namespace`)
//! - **Level-triggered**: Coalesces bursts of events into single reconcile passes per resource
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks
//!
//! ## Usage
//!
//! See the [README.md](../README.md) for detailed usage instructions and examples.

use anyhow::Result;
use clap::Parser;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{error, info};

use dummy_operator::crd::Dummy;
use dummy_operator::observability::metrics;
use dummy_operator::queue::{run_workers, WorkQueue};
use dummy_operator::reconciler::Reconciler;
use dummy_operator::server::{start_server, ServerState};
use dummy_operator::state::{ClusterState, KubeClusterState};
use dummy_operator::trigger::{watch_dummies, watch_pods, ReadyGate};
use tokio_util::sync::CancellationToken;

/// Dummy Operator
#[derive(Parser, Debug)]
#[command(name = "dummy-operator")]
#[command(about = "Kubernetes operator for Dummy resources", long_about = None)]
struct Args {
    /// Kubernetes namespace to watch (defaults to all namespaces)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Number of concurrent reconcile workers
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Port for the metrics and probe HTTP server
    #[arg(long, default_value_t = 8080)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dummy_operator=info".into()),
        )
        .init();

    info!("Starting Dummy operator");

    // Initialize metrics
    metrics::register_metrics()?;

    let shutdown = CancellationToken::new();

    // Create server state
    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    });

    // Start HTTP server for metrics and probes
    let server_state_clone = Arc::clone(&server_state);
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = start_server(args.metrics_port, server_state_clone, server_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Create Kubernetes client
    let client = Client::try_default().await?;

    // Watch all namespaces unless one was pinned on the command line.
    // Dummies and their child pods must share a scope so every event reaches
    // the queue.
    let (dummies, pods): (Api<Dummy>, Api<Pod>) = match args.namespace.as_deref() {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let queue = WorkQueue::new();

    // Readiness flips once both watch streams have listed existing state
    let gate = ReadyGate::new(2, Arc::clone(&server_state.is_ready));

    let dummy_watch = tokio::spawn(watch_dummies(
        dummies,
        queue.clone(),
        Arc::clone(&gate),
        shutdown.clone(),
    ));
    let pod_watch = tokio::spawn(watch_pods(
        pods,
        queue.clone(),
        Arc::clone(&gate),
        shutdown.clone(),
    ));

    let cluster: Arc<dyn ClusterState> = Arc::new(KubeClusterState::new(client));
    let reconciler = Arc::new(Reconciler::new(cluster));
    let workers = tokio::spawn(run_workers(
        queue,
        reconciler,
        args.workers,
        shutdown.clone(),
    ));

    shutdown_signal().await?;
    info!("Shutdown signal received, stopping");

    shutdown.cancel();
    let _ = tokio::join!(dummy_watch, pod_watch, workers, server);

    info!("Controller stopped");

    Ok(())
}

/// Completes when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
