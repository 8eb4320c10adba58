use std::process::exit;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor_engine::prelude::*;
use conveyor_worker::register_builtin;

// Exit codes: 0 clean shutdown, 1 configuration error, 2 unrecoverable
// store error, 3 unrecoverable queue error.

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("conveyor-worker starting...");

    let store_pool = match PgPool::connect(&config.db_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("store connection failed: {}", e);
            exit(2);
        }
    };
    let store = PostgresExecutionStore::new(store_pool.clone());
    if let Err(e) = store.migrate().await {
        tracing::error!("store migration failed: {}", e);
        exit(2);
    }
    tracing::info!("store ready");

    // The queue may live in the store's database or its own
    let queue_pool = if config.queue_url == config.db_url {
        store_pool
    } else {
        match PgPool::connect(&config.queue_url).await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!("queue connection failed: {}", e);
                exit(3);
            }
        }
    };
    let queue = PostgresTaskQueue::new(queue_pool);

    let mut registry = HandlerRegistry::new();
    register_builtin(&mut registry);
    tracing::info!(
        task_types = ?registry.task_types().collect::<Vec<_>>(),
        "handlers registered"
    );

    let store: Arc<dyn ExecutionStore> = Arc::new(store);
    let queue: Arc<dyn TaskQueue> = Arc::new(queue);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::new(registry),
        &config,
    ));

    let pool = WorkerPool::start(
        orchestrator,
        Arc::clone(&queue),
        WorkerPoolConfig::from_engine(&config),
    );

    let (sweeper_shutdown_tx, sweeper_shutdown_rx) = watch::channel(false);
    let sweeper = Sweeper::new(Arc::clone(&store), Arc::clone(&queue), &config);
    let sweeper_handle = tokio::spawn(sweeper.run(sweeper_shutdown_rx));

    tracing::info!(
        concurrency = config.worker_concurrency,
        "worker ready to execute workflows"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("shutdown signal received");

    let _ = sweeper_shutdown_tx.send(true);
    let _ = sweeper_handle.await;

    if let Err(e) = pool.shutdown().await {
        tracing::warn!("shutdown incomplete: {}", e);
    }

    exit(0);
}
