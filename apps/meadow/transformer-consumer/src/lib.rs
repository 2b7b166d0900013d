//! Transformer event consumer.
//!
//! ```text
//! Redis Streams (meadow.step_batch.<tenant>, meadow.step_errors.<tenant>,
//!                meadow.lifecycle.<tenant>)     — one set per tenant
//!   ↓ (bespoke consumer group loop, per topic)
//! DispatchPipeline
//!   ↓
//! Redis Streams (binding output_topic, meadow.dispatch_errors.<tenant>,
//!                meadow.events.<tenant> for republished lifecycle)
//! ```
//!
//! Redis Streams have no wildcard subscribe, so the set of tenants to
//! consume for is read once at startup from configuration; a tenant added
//! afterwards needs a restart to pick up.

mod consumer;
mod health;

use crate::consumer::{TopicConsumer, TopicConsumerConfig, TopicKind};
use crate::health::{health_router, HealthState};
use eyre::{Result, WrapErr};
use meadow_config::{redis::RedisConfig, tracing::init_tracing, Environment, FromEnv};
use meadow_redis_store::{
    RedisBindingRepository, RedisJsonStore, RedisMappingRepository, RedisStreamPublisher,
};
use meadow_transformer::{BindingMatcher, DispatchPipeline, MappingCache};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    init_tracing(&environment);
    meadow_observability::init_metrics();

    info!(?environment, "starting meadow transformer consumer");

    let tenant_ids = load_tenant_ids()?;
    info!(tenants = tenant_ids.len(), "loaded tenant list");

    let topic_prefix = env::var("TRANSFORMER_TOPIC_PREFIX").unwrap_or_else(|_| "meadow".to_string());
    let consumer_group =
        env::var("TRANSFORMER_CONSUMER_GROUP").unwrap_or_else(|_| "meadow-transformer".to_string());
    let health_port: u16 = env::var("TRANSFORMER_HEALTH_PORT")
        .or_else(|_| env::var("HEALTH_PORT"))
        .unwrap_or_else(|_| "8082".to_string())
        .parse()
        .unwrap_or(8082);

    let redis_config = RedisConfig::from_env().wrap_err("failed to load Redis configuration")?;
    let client = redis::Client::open(redis_config.uri.as_str()).wrap_err("invalid Redis URI")?;
    let redis = client
        .get_connection_manager()
        .await
        .wrap_err("failed to connect to Redis")?;
    info!("connected to Redis");

    let store = RedisJsonStore::new(redis.clone());
    let binding_repo = Arc::new(RedisBindingRepository::new(store.clone()));
    let mapping_repo = Arc::new(RedisMappingRepository::new(store.clone()));
    let producer = Arc::new(RedisStreamPublisher::new(redis.clone()));

    let matcher = Arc::new(BindingMatcher::new(binding_repo));
    let mapping_cache = Arc::new(MappingCache::new(mapping_repo));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState {
        redis: redis.clone(),
        app_name: "meadow-transformer-consumer",
        app_version: env!("CARGO_PKG_VERSION"),
        tenant_ids: Arc::new(tenant_ids.clone()),
    };
    let health_rx = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port, health_rx).await {
            error!(error = %e, "health server failed");
        }
    });

    let batch_size = env_usize("TRANSFORMER_BATCH_SIZE", 50);
    let block_timeout_ms = env_u64("TRANSFORMER_BLOCK_TIMEOUT_MS", 5000);
    let claim_idle_time_secs = env_u64("TRANSFORMER_CLAIM_IDLE_SECONDS", 60);
    let enable_dlq = env::var("TRANSFORMER_ENABLE_DLQ")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);

    let mut tasks = JoinSet::new();
    for tenant_id in &tenant_ids {
        let error_topic = format!("{topic_prefix}.dispatch_errors.{tenant_id}");
        let passthrough_topic = format!("{topic_prefix}.events.{tenant_id}");
        let pipeline = Arc::new(
            DispatchPipeline::new(matcher.clone(), mapping_cache.clone(), producer.clone(), error_topic)
                .with_passthrough_topic(passthrough_topic),
        );

        for (suffix, kind) in [
            ("step_batch", TopicKind::StepBatch),
            ("step_errors", TopicKind::StepBatch),
            ("lifecycle", TopicKind::Lifecycle),
        ] {
            let stream_name = format!("{topic_prefix}.{suffix}.{tenant_id}");
            let config = TopicConsumerConfig {
                stream_name: stream_name.clone(),
                consumer_group: consumer_group.clone(),
                consumer_id: consumer_id(),
                kind,
                batch_size,
                block_timeout_ms,
                claim_idle_time_secs,
                enable_dlq,
            };
            let consumer = TopicConsumer::new(redis.clone(), config, pipeline.clone());
            let shutdown_rx = shutdown_rx.clone();
            tasks.spawn(async move {
                if let Err(e) = consumer.run(shutdown_rx).await {
                    error!(stream = %stream_name, error = %e, "consumer loop exited with error");
                }
            });
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("transformer consumer stopped");
    Ok(())
}

fn load_tenant_ids() -> Result<Vec<String>> {
    let raw = env::var("TRANSFORMER_TENANT_IDS")
        .wrap_err("TRANSFORMER_TENANT_IDS must be set to a comma-separated list of tenant ids")?;
    let ids: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(eyre::eyre!("TRANSFORMER_TENANT_IDS contained no tenant ids"));
    }
    Ok(ids)
}

fn consumer_id() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| format!("consumer-{}", uuid::Uuid::new_v4()))
}

async fn start_health_server(
    state: HealthState,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = health_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("failed to bind health server to {addr}"))?;

    info!(%port, "health and metrics server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .wrap_err("health server failed")?;
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, initiating shutdown"),
        _ = terminate => info!("received SIGTERM, initiating shutdown"),
    }

    Ok(())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
