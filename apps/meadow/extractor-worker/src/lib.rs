//! Extractor job queue worker.
//!
//! ```text
//! Redis Stream (meadow.jobs)
//!   ↓ (Consumer Group)
//! StreamWorker<ExtractorJob, ExtractorProcessor>
//!   ↓
//! PlanExecutor
//!   ↓ (step-batch / lifecycle events)
//! Redis Streams (meadow.step_batch.<tenant>, meadow.lifecycle.<tenant>, ...)
//! ```

mod job;
mod processor;

use crate::job::ExtractorJob;
use crate::processor::ExtractorProcessor;
use axum::Router;
use eyre::{Result, WrapErr};
use meadow_auth::AuthManager;
use meadow_config::{redis::RedisConfig, server::ServerConfig, tracing::init_tracing, Environment, FromEnv};
use meadow_extractor::{
    FanOutExecutor, PlanExecutor, PlanExecutorDeps, PlanExecutorOptions, StepExecutor,
    StepExecutorFlowRunner,
};
use meadow_http::HttpClient;
use meadow_ratelimit::RateLimitManager;
use meadow_redis_store::{
    RedisAuthFlowRepository, RedisConfigRepository, RedisDistributedLock, RedisExecutionRepository,
    RedisJsonStore, RedisPlanContextRepository, RedisPlanRepository, RedisStatisticsRepository,
    RedisStreamPublisher,
};
use meadow_stream_worker::{full_admin_router, HealthState, StreamWorker, WorkerConfig};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    init_tracing(&environment);
    meadow_observability::init_metrics();

    info!(?environment, "starting meadow extractor worker");

    let health_port: u16 = env::var("EXTRACTOR_HEALTH_PORT")
        .or_else(|_| env::var("HEALTH_PORT"))
        .unwrap_or_else(|_| "8081".to_string())
        .parse()
        .unwrap_or(8081);

    let redis_config = RedisConfig::from_env().wrap_err("failed to load Redis configuration")?;
    let client = redis::Client::open(redis_config.uri.as_str())
        .wrap_err("invalid Redis URI")?;
    let redis = client
        .get_connection_manager()
        .await
        .wrap_err("failed to connect to Redis")?;
    info!("connected to Redis");

    let store = RedisJsonStore::new(redis.clone());
    let producer = Arc::new(RedisStreamPublisher::new(redis.clone()));
    let lock = Arc::new(RedisDistributedLock::new(redis.clone()));

    let http = HttpClient::new();
    let rate_limiter = Arc::new(RateLimitManager::new());
    let step_executor = Arc::new(StepExecutor::new(http, rate_limiter));
    let fan_out = Arc::new(FanOutExecutor::new(step_executor.clone()));

    let max_rate_wait = env_duration_secs("EXTRACTOR_MAX_RATE_WAIT_SECONDS", 60);
    let flow_runner = Arc::new(StepExecutorFlowRunner::new(step_executor.clone(), max_rate_wait));
    let auth_manager = Arc::new(AuthManager::new(flow_runner));

    let deps = PlanExecutorDeps {
        plans: Arc::new(RedisPlanRepository::new(store.clone())),
        configs: Arc::new(RedisConfigRepository::new(store.clone())),
        auth_flows: Arc::new(RedisAuthFlowRepository::new(store.clone())),
        executions: Arc::new(RedisExecutionRepository::new(store.clone())),
        statistics: Arc::new(RedisStatisticsRepository::new(store.clone())),
        plan_contexts: Arc::new(RedisPlanContextRepository::new(store.clone())),
        producer,
        lock,
        auth_manager,
        step_executor,
        fan_out,
    };

    let options = PlanExecutorOptions {
        max_rate_wait,
        max_loops: env_u32("EXTRACTOR_MAX_LOOPS", 1000),
        lock_ttl: Duration::from_secs(env_u64("EXTRACTOR_LOCK_TTL_SECONDS", 30)),
        topic_prefix: env::var("EXTRACTOR_TOPIC_PREFIX").unwrap_or_else(|_| "meadow".to_string()),
    };

    let executor = Arc::new(PlanExecutor::new(deps, options));
    let processor = Arc::new(ExtractorProcessor::new(executor));

    let stream_name = env::var("EXTRACTOR_JOB_STREAM").unwrap_or_else(|_| "meadow.jobs".to_string());
    let consumer_group =
        env::var("EXTRACTOR_CONSUMER_GROUP").unwrap_or_else(|_| "meadow-extractor".to_string());

    let worker_config = WorkerConfig::new(stream_name.clone(), consumer_group)
        .with_max_concurrent_jobs(env_u64("EXTRACTOR_MAX_CONCURRENT_JOBS", 4) as usize)
        .with_max_retries(env_u32("EXTRACTOR_MAX_RETRIES", 3))
        .with_claim_idle_time_secs(env_u64("EXTRACTOR_CLAIM_IDLE_SECONDS", 60))
        .with_blocking(Some(env_u64("EXTRACTOR_BLOCK_TIMEOUT_MS", 5000)));
    info!(
        stream = %worker_config.stream_name,
        consumer_group = %worker_config.consumer_group,
        consumer_id = %worker_config.consumer_id,
        max_concurrent_jobs = %worker_config.max_concurrent_jobs,
        "worker configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(
        Arc::new(redis.clone()),
        "meadow-extractor-worker",
        env!("CARGO_PKG_VERSION"),
        stream_name,
    );
    let health_state_clone = health_state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state_clone, health_port).await {
            error!(error = %e, "health server failed");
        }
    });

    let worker = StreamWorker::<ExtractorJob, _>::with_arc_processor(redis, processor, worker_config);
    worker
        .run(shutdown_rx)
        .await
        .map_err(|e| eyre::eyre!("{e}"))?;

    info!("extractor worker stopped");
    Ok(())
}

async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app: Router = full_admin_router(health_state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("failed to bind health server to {addr}"))?;

    info!(%port, "health and admin server listening");
    axum::serve(listener, app).await.wrap_err("health server failed")?;
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

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(key, default_secs))
}
