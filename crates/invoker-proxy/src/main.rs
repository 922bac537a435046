//! invocation proxy
//!
//! Serves `POST /run` on `PORT`, executes each job in a sandboxed child
//! process and writes its result to the object store.

mod config;
mod http;
mod observability;

use std::sync::Arc;

use invoker_core::impls::LocalObjectStore;
use invoker_core::ports::{Clock, IdGenerator, ObjectStore, SystemClock, UlidGenerator};
use invoker_core::{Invoker, ResultReporter, Sandbox, Scheduler, TaskDecoder};
use tokio::signal;

use crate::config::ProxyConfig;
use crate::http::{AppState, BackgroundTasks};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ProxyConfig::from_env();
    observability::init(config.as_ref().map(|c| c.log_format).unwrap_or_default());
    let config =
        config.inspect_err(|err| tracing::error!(error = %err, "invalid configuration"))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
    let local = LocalObjectStore::new(&config.storage_root);
    let storage_root = local.root().display().to_string();
    let store: Arc<dyn ObjectStore> = Arc::new(local);
    let retry = config.retry_policy();

    let sandbox = Arc::new(Sandbox::new(config.sandbox_config(), Arc::clone(&clock)));
    let invoker = Invoker::new(Arc::clone(&store), sandbox, retry.clone(), Arc::clone(&clock))
        .with_max_timeout_seconds(config.max_timeout_seconds);
    let scheduler = Arc::new(Scheduler::start(
        config.scheduler_config(),
        Arc::new(invoker),
        Arc::clone(&ids),
        Arc::clone(&clock),
    ));

    let state = AppState {
        decoder: TaskDecoder::new(ids),
        scheduler,
        reporter: ResultReporter::new(store, retry),
        clock,
        mode: config.reporting_mode,
        background: BackgroundTasks::default(),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        slots = state.scheduler.slots(),
        mode = ?config.reporting_mode,
        %storage_root,
        "invocation proxy listening"
    );

    axum::serve(listener, http::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // async jobs answered 202 still need their results written
    state.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
