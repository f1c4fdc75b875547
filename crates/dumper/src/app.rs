//! Wiring: store, dispatcher, producer and signal handling for one run.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use chatdump_db::{DocumentStore, MemoryStore, PgDocumentStore};
use chatdump_icq::IcqApi;
use chatdump_queue::{DispatchError, Dispatcher};

use crate::config::DumperConfig;
use crate::hooks::StoreHooks;
use crate::producer::{DumpSummary, HistoryProducer, HistorySource, ProducerError};

/// Run a dump with the store and API client described by `config`,
/// stopping early on Ctrl-C or SIGTERM.
pub async fn run(config: DumperConfig) -> anyhow::Result<DumpSummary> {
    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => {
            let pool = chatdump_db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            chatdump_db::health_check(&pool)
                .await
                .context("Database health check failed")?;
            chatdump_db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Database connected, migrations applied");
            Arc::new(PgDocumentStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, documents are kept in memory and lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let api = IcqApi::with_base_url(config.aimsid.as_str(), config.api_url.as_str())
        .context("Failed to build ICQ API client")?;

    run_with(&config, store, Arc::new(api), shutdown_signal()).await
}

/// Run a dump against explicit collaborators.
///
/// `shutdown` resolving has the same effect as a signal: the dispatcher is
/// destroyed, the producer stops submitting, and in-flight jobs drain.
pub async fn run_with<S>(
    config: &DumperConfig,
    store: Arc<dyn DocumentStore>,
    source: Arc<dyn HistorySource>,
    shutdown: S,
) -> anyhow::Result<DumpSummary>
where
    S: Future<Output = ()> + Send + 'static,
{
    let dispatcher = Dispatcher::with_config(config.dispatcher_config())?
        .with_hooks(Arc::new(StoreHooks::new(Arc::clone(&store))));
    let handle = dispatcher.handle();
    let dispatcher_task = tokio::spawn(dispatcher.bootstrap(config.worker_count));

    let signal_task = tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown.await;
            tracing::info!("Shutdown signal received, draining jobs");
            if let Err(e) = handle.destroy() {
                tracing::debug!(error = %e, "Dispatcher already stopping");
            }
        }
    });

    let producer = HistoryProducer::new(source, store, handle.clone(), config.page_size);
    let result = producer.run(&config.chat).await;

    match handle.destroy() {
        Ok(()) | Err(DispatchError::AlreadyDestroyed) => {}
        Err(e) => return Err(e.into()),
    }
    signal_task.abort();

    dispatcher_task
        .await
        .context("Dispatcher task panicked")?
        .context("Dispatcher failed")?;

    let summary = match result {
        Ok(summary) => summary,
        Err(ProducerError::Dispatch(DispatchError::ShuttingDown)) => DumpSummary {
            interrupted: true,
            ..Default::default()
        },
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        chats = summary.chats,
        pages = summary.pages,
        messages = summary.messages,
        dropped_pages = summary.dropped_pages,
        discarded_pages = summary.discarded_pages,
        failed_chats = summary.failed_chats.len(),
        interrupted = summary.interrupted,
        "Dump finished",
    );
    Ok(summary)
}

/// Wait for Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
