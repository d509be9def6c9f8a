//! Sentry Kubernetes Operator
//!
//! Main entry point for the operator. Parses flags, sets up the Kubernetes and
//! Sentry clients, optionally waits for the leader lease, and runs the
//! reconciliation loops.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sentry_operator::{
    config::OperatorConfig,
    controllers::{self, Context},
    crd::Registry,
    leader::{self, LeaderElector},
    metrics, secrets,
    sentry::{HttpSentryClient, Sentry},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    // Initialize tracing
    init_tracing();

    config.validate()?;
    info!(
        organization = %config.sentry_organization,
        sentry_url = %config.sentry_url,
        "Starting Sentry Operator"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Kinds are registered once here and handed to everything that needs them
    let registry = Registry::with_sentry_kinds();
    registry.verify_installed(&client).await?;

    let token = secrets::resolve_token(&client, &config.token_source()?).await?;
    let http = HttpSentryClient::new(config.sentry_url.clone(), token, config.request_timeout())?;
    let sentry = Sentry::new(config.sentry_organization.clone(), Arc::new(http));

    let shutdown = CancellationToken::new();

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_address));

    let elector = if config.leader_election {
        let elector = LeaderElector::new(
            client.clone(),
            &config.leader_election_namespace,
            leader::default_identity(),
        );
        tokio::select! {
            acquired = elector.acquire(&shutdown) => acquired?,
            _ = shutdown_signal() => {
                info!("Received shutdown signal before becoming leader");
                return Ok(());
            }
        }
        Some(elector)
    } else {
        None
    };
    let lease = async {
        match &elector {
            Some(elector) => elector.hold(shutdown.clone()).await,
            None => std::future::pending().await,
        }
    };

    let context = Arc::new(Context::new(
        client.clone(),
        sentry,
        registry,
        &config,
        shutdown.clone(),
    ));

    // Run all controllers concurrently
    let team_controller = controllers::run_team_controller(context.clone());
    let project_controller = controllers::run_project_controller(context.clone());
    metrics::set_ready(true);

    // Handle graceful shutdown
    tokio::select! {
        _ = team_controller => {
            error!("Team controller exited unexpectedly");
        }
        _ = project_controller => {
            error!("Project controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        result = lease => {
            if let Err(e) = result {
                error!(error = %e, "Lost leadership, stopping operator");
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    metrics::set_ready(false);
    shutdown.cancel();
    if let Some(elector) = &elector {
        // Hand the lease over right away instead of letting it expire
        elector.release().await;
    }

    info!("Sentry Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
