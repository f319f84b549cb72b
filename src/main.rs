//! knmstate - declarative node network configuration for Kubernetes clusters

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use knmstate::controller::operator::{
    DaemonSetHandlerDeployment, NmstateClientImpl, OperatorContext,
};
use knmstate::controller::{policy, state};
use knmstate::crd::{
    NMState, NodeNetworkConfigurationEnactment, NodeNetworkConfigurationPolicy, NodeNetworkState,
};
use knmstate::engine::NmstatectlEngine;
use knmstate::environment::{self, OperatorEnvironment, ProfilerConfig, Role, WebhookEnvironment};
use knmstate::{lock, webhook};

/// knmstate - node network configuration handler, operator and webhook
#[derive(Parser, Debug)]
#[command(name = "knmstate", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Webhook listen address (webhook role only)
    #[arg(long, default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install crypto provider");

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crds = [
            serde_yaml::to_string(&NodeNetworkConfigurationPolicy::crd())?,
            serde_yaml::to_string(&NodeNetworkConfigurationEnactment::crd())?,
            serde_yaml::to_string(&NodeNetworkState::crd())?,
            serde_yaml::to_string(&NMState::crd())?,
        ];
        println!("{}", crds.join("---\n"));
        return Ok(());
    }

    start_profiler_if_enabled();

    match environment::role() {
        Role::Operator => run_operator().await,
        Role::Webhook => run_webhook(cli).await,
        Role::Handler => run_handler().await,
    }
}

/// Run in handler mode: own this node's host network
async fn run_handler() -> anyhow::Result<()> {
    let node_name = environment::node_name()?;
    let lock_path = environment::lock_file_path()?;

    tracing::info!(node = %node_name, "knmstate handler starting");

    // At most one handler process per node mutates the host. Held for the
    // process lifetime.
    let _handler_lock = lock::acquire(&lock_path).await?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let engine = Arc::new(NmstatectlEngine::new());

    let state_ctx = Arc::new(state::StateContext::new(
        client.clone(),
        node_name.clone(),
        engine.clone(),
    ));
    state::ensure_state_exists(&state_ctx).await?;

    let policy_ctx = Arc::new(policy::Context::new(client.clone(), node_name, engine));

    tracing::info!("starting policy and node state controllers");
    tokio::try_join!(
        policy::run(client.clone(), policy_ctx),
        state::run(client, state_ctx),
    )?;

    tracing::info!("knmstate handler shutting down");
    Ok(())
}

/// Run in operator mode: reconcile the NMState singleton
async fn run_operator() -> anyhow::Result<()> {
    tracing::info!("knmstate operator starting");

    let env = OperatorEnvironment::from_env()?;
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let ctx = Arc::new(OperatorContext {
        nmstates: Arc::new(NmstateClientImpl::new(client.clone())),
        deployment: Arc::new(DaemonSetHandlerDeployment::new(client.clone(), env)),
    });

    knmstate::controller::operator::run(client, ctx).await?;

    tracing::info!("knmstate operator shutting down");
    Ok(())
}

/// Run in webhook mode: stamp policy mutation timestamps
async fn run_webhook(cli: Cli) -> anyhow::Result<()> {
    tracing::info!(addr = %cli.webhook_addr, "knmstate webhook starting");

    let env = WebhookEnvironment::from_env()?;
    webhook::serve(cli.webhook_addr, &env).await?;

    tracing::info!("knmstate webhook shutting down");
    Ok(())
}

/// Start the debug listener when ENABLE_PROFILER is set
fn start_profiler_if_enabled() {
    let cfg = ProfilerConfig::from_env();
    if !cfg.enable_profiler {
        return;
    }

    tokio::spawn(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], cfg.profiler_port));
        tracing::info!(%addr, "starting profiler server");

        let router = axum::Router::new().route(
            "/debug/build",
            axum::routing::get(|| async {
                axum::Json(serde_json::json!({
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                }))
            }),
        );

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "failed to start the profiler server");
                return;
            }
        };
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "profiler server error");
        }
    });
}
