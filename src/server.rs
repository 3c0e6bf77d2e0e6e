use std::net::SocketAddr;
use std::sync::Arc;

use hookbox::api::{self, AppState};
use hookbox::backup::BackupStore;
use hookbox::config::Config;
use hookbox::dispatch::ReqwestCaller;
use hookbox::ledger::{Ledger, RetentionPolicy};
use hookbox::storage::Storage;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(config: Config) -> Result<(), AnyError> {
    let address = config.server.bind_addr;

    info!(path = %config.server.data_path.display(), "Opening ledger");
    let ledger = Ledger::open(&config.server.data_path)
        .map_err(|e| format!("Failed to open ledger: {}", e))?;

    let caller = ReqwestCaller::new(&config.dispatch)
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
    let state = AppState::new(config.clone(), ledger.clone(), Arc::new(caller));

    let policy = RetentionPolicy::from_days(
        config.retention.executions_ttl_days,
        config.retention.messages_ttl_days,
    );
    prune(&state.storage, policy).await;
    let pruner = tokio::spawn(prune_periodically(
        state.storage.clone(),
        policy,
        config.retention.prune_interval.as_duration(),
    ));

    if config.backup.export_on_start {
        match BackupStore::local(&config.backup.dir) {
            Ok(backups) => {
                if let Err(err) = backups.export(&state.storage).await {
                    warn!(error = %err, "Startup export failed");
                }
            }
            Err(err) => warn!(error = %err, "Backup directory unavailable"),
        }
    }

    // Triggers always come from storage, never from in-memory defaults
    let registered = state.synchronizer.load_active().await?;
    state.clock().start();
    info!(registered, "Cron clock running");

    let app = api::router(state.clone());
    let listener = TcpListener::bind(address).await?;
    info!(%address, "hookbox listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.clock().stop();
    pruner.abort();
    flush_pending(&state).await;
    ledger.persist()?;
    info!("Shutdown complete");

    Ok(())
}

async fn prune(storage: &Storage, policy: RetentionPolicy) {
    match storage
        .call("prune_expired", |ledger| ledger.prune_expired(&policy))
        .await
    {
        Ok(stats) => info!(
            executions = stats.executions_pruned,
            received = stats.received_pruned,
            forwarded = stats.forwarded_pruned,
            "Retention prune finished"
        ),
        Err(err) => error!(error = %err, "Retention prune failed"),
    }
}

async fn prune_periodically(storage: Storage, policy: RetentionPolicy, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately; startup already pruned
    ticker.tick().await;
    loop {
        ticker.tick().await;
        prune(&storage, policy).await;
    }
}

/// Forward whatever is still buffered so accepted messages are not left unprocessed
async fn flush_pending(state: &AppState) {
    let keys = state.buffer.pending_keys();
    if keys.is_empty() {
        return;
    }

    info!(keys = keys.len(), "Flushing pending batches before exit");
    for key in keys {
        if let Err(err) = state.buffer.flush(&key).await {
            error!(
                buffer_config_id = key.buffer_config_id,
                key = %key.key_value,
                error = %err,
                "Flush on shutdown failed"
            );
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
