use actix_web::dev::ServerHandle;
use anyhow::Context;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_sync::cache::{CacheKeys, RedisOrderCache};
use order_sync::config::{Config, Environment};
use order_sync::ingest::IngestionConsumer;
use order_sync::messaging::{KafkaBroker, MessageBroker};
use order_sync::metrics::Metrics;
use order_sync::server::{start_http_server, AppState};
use order_sync::services::{CacheService, OrderService, SyncService};
use order_sync::store::PgOrderStore;
use order_sync::utils::{cancel_on, retry_on_transient, RetryConfig, RunScope};
use order_sync::validation::OrderValidator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_tracing(config.env);

    tracing::info!(env = ?config.env, "🚀 Starting order sync service");

    // Listen from the start so a signal during warm-up still shuts down cleanly
    let shutdown = CancellationToken::new();
    let _signal_listener = cancel_on(shutdown.clone(), shutdown_signal());

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Store and cache (fatal if unreachable after retries) ===
    let store = retry_on_transient(RetryConfig::startup(), "postgres_connect", |_| {
        PgOrderStore::connect(&config.database)
    })
    .await
    .into_result()
    .context("relational store unreachable")?;
    let store = Arc::new(store);

    let cache = retry_on_transient(RetryConfig::startup(), "redis_connect", |_| {
        RedisOrderCache::connect(&config.redis)
    })
    .await
    .into_result()
    .context("cache unreachable")?;
    let cache = Arc::new(cache);

    let cache_service = Arc::new(CacheService::new(
        store.clone(),
        cache.clone(),
        CacheKeys::new(config.redis.key_prefix.clone()),
        &config.cache,
        metrics.clone(),
    ));
    let order_service = Arc::new(OrderService::new(store.clone(), cache_service.clone(), metrics.clone()));

    // === 3. HTTP: /metrics, /health, /order/{id} ===
    let server = start_http_server(
        AppState {
            metrics: metrics.clone(),
            orders: order_service,
            cache: cache.clone(),
        },
        &config.http.address,
    )?;
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // === 4. Warm the cache before consuming ===
    match cache_service
        .restore_cache(&RunScope::new(shutdown.child_token()), config.cache.page_size)
        .await
    {
        Ok(cached) => tracing::info!(cached = cached, "✅ Cache warm-up complete"),
        Err(e) => tracing::warn!(error = %e, "Cache warm-up failed, starting with a cold cache"),
    }

    if shutdown.is_cancelled() {
        tracing::info!("Shutdown requested during warm-up");
        stop_http(server_handle, server_task).await;
        store.close().await;
        return Ok(());
    }

    // === 5. Durable subscription ===
    let broker = KafkaBroker::new(config.broker.brokers.clone());
    let subscription = broker
        .subscribe(&config.broker.topic, &config.broker.durable_name)
        .await
        .context("broker subscription failed")?;

    let consumer = Arc::new(
        IngestionConsumer::new(
            store.clone(),
            cache_service.clone(),
            OrderValidator::new(config.validation.clone()),
            config.broker.max_in_flight,
            metrics.clone(),
        )
        .with_redelivery_delay(config.broker.redelivery_delay()),
    );
    let consumer_task = tokio::spawn(consumer.clone().run(subscription, shutdown.clone()));

    // === 6. Periodic reconciliation ===
    let sync_service = Arc::new(SyncService::new(cache_service, &config.sync, metrics.clone()));
    let sync_task = tokio::spawn(sync_service.run_periodic(shutdown.clone()));

    shutdown.cancelled().await;
    tracing::info!("Shutdown signal received, draining");

    // === 7. Graceful shutdown ===

    let subscription = consumer_task.await.context("consumer task panicked")?;
    if !consumer.drain(config.broker.drain_timeout()).await {
        tracing::warn!(
            in_flight = consumer.in_flight(),
            timeout_secs = config.broker.drain_timeout_secs,
            "Drain deadline elapsed, abandoning in-flight handlers"
        );
    }

    if let Err(e) = subscription.unsubscribe().await {
        tracing::warn!(error = %e, "Failed to unsubscribe cleanly");
    }

    if let Err(e) = sync_task.await {
        tracing::warn!(error = %e, "Sync task ended abnormally");
    }

    stop_http(server_handle, server_task).await;
    store.close().await;

    tracing::info!("👋 Shutdown complete");
    Ok(())
}

async fn stop_http(handle: ServerHandle, task: JoinHandle<std::io::Result<()>>) {
    handle.stop(true).await;
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "HTTP server stopped with an error"),
        Err(e) => tracing::warn!(error = %e, "HTTP server task ended abnormally"),
    }
}

fn init_tracing(env: Environment) {
    // RUST_LOG wins when set, e.g. RUST_LOG=debug
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,order_sync=debug"))
    };

    if env == Environment::Prod {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .with(filter())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
