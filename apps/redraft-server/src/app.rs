//! Application state and initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use redraft_api::AppState;
use redraft_core::AppConfig;
use redraft_infra::{
    BoundedScheduler, Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig,
    HealthMonitor, HealthMonitorConfig, MetricsTracker, ResilientInvoker, RetryConfig,
    RetryPolicy, TimeoutPolicy,
};
use redraft_ingestion::{
    ContentExtractor, FsArtifactStore, OptimizationPipeline, TextChunker, UploadPolicy,
    UploadValidator,
};

use crate::cli::Args;
use crate::server::Server;

const ENV_PREFIX: &str = "REDRAFT";

/// Wire every component described by the configuration
pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    info!("Initializing application components");

    let client = redraft_adapters::inference_client(&config.inference)
        .context("Failed to create inference client")?;

    let store = Arc::new(
        FsArtifactStore::new(&config.upload.temp_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to prepare upload directory {}",
                    config.upload.temp_dir.display()
                )
            })?,
    );

    let metrics = MetricsTracker::new();
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::from(&config.circuit_breaker));

    let invoker = ResilientInvoker::new(
        client.clone(),
        config.inference.model.clone(),
        breaker.clone(),
        RetryPolicy::new(RetryConfig::from(&config.retry)),
        Bulkhead::new(BulkheadConfig::from(&config.inference)),
        metrics.clone(),
    );

    let scheduler = BoundedScheduler::new(
        Arc::new(invoker),
        TimeoutPolicy::from(&config.timeout),
        config.scheduler.max_concurrency,
        config.inference.prompt_template.clone(),
    );

    let chunker = TextChunker::from_config(&config.chunking).context("Invalid chunking settings")?;

    let pipeline = OptimizationPipeline::new(
        ContentExtractor::default(),
        chunker,
        Arc::new(scheduler),
        metrics,
    );

    let validator = UploadValidator::new(UploadPolicy::from(&config.upload), store.clone());

    let health = HealthMonitor::new(
        client,
        config.inference.model.clone(),
        breaker,
        HealthMonitorConfig::from(&config.health),
    )
    .with_check(store);

    info!(
        endpoint = %config.inference.base_url,
        model = %config.inference.model,
        max_concurrency = config.scheduler.max_concurrency,
        max_concurrent_requests = config.inference.max_concurrent_requests,
        "Inference pipeline ready"
    );

    Ok(AppState::new(
        Arc::new(validator),
        Arc::new(pipeline),
        health,
        config.server.request_timeout(),
    ))
}

/// Main application
pub struct App {
    config: AppConfig,
    state: AppState,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        args.validate().context("Invalid command line arguments")?;

        let mut config = AppConfig::load_from(Some(args.config.as_path()), ENV_PREFIX)
            .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(host) = args.host {
            config.server.host = host;
        }

        let state = build_state(&config).await?;

        Ok(Self { config, state })
    }

    /// Run the application until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        Server::new(self.config.server, self.state).run().await
    }
}
