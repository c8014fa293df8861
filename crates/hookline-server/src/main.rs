//! Hookline - campaign engine entry point

use anyhow::{Context, Result};
use hookline_api::AppState;
use hookline_common::config::{Config, LoggingConfig};
use hookline_core::{Engine, EngineOptions, LettreTransport, MiniJinjaRenderer, Repositories, SystemClock};
use hookline_storage::{DatabasePool, MemoryStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    init_logging(&config.logging);

    info!(instance = %config.server.instance_name, "Starting Hookline campaign engine...");

    // Initialize storage
    let (repos, db_pool) = match config.database.url {
        Some(_) => {
            let db_pool = DatabasePool::new(&config.database).await?;
            db_pool.migrate().await?;
            info!("Database migrations completed");
            (Repositories::postgres(db_pool.clone()), Some(db_pool))
        }
        None => {
            warn!("No database.url configured; campaigns are kept in memory only");
            (Repositories::memory(Arc::new(MemoryStore::new())), None)
        }
    };

    let transport = LettreTransport::new(config.smtp.timeout(), config.smtp.hello_name.clone());
    let engine = Engine::new(
        EngineOptions::from_config(&config),
        repos,
        Arc::new(MiniJinjaRenderer::new()),
        Arc::new(transport),
        Arc::new(SystemClock),
    );

    let shutdown = CancellationToken::new();

    // Start scheduler
    let scheduler_handle = {
        let scheduler = engine.scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            scheduler.run(shutdown).await;
        })
    };

    // Start API server
    let state = AppState::new(engine, config.api.admin_token.as_deref(), db_pool);
    if state.admin_token_hash.is_none() {
        warn!("api.admin_token is not set; owner API is disabled");
    }
    let app = hookline_api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("Failed to bind API server on {}", config.api.bind))?;
    info!(bind = %config.api.bind, "Starting API server");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .context("API server error")?;

    // In-flight sends finish before exit
    shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        tracing::error!("Scheduler task failed: {}", e);
    }

    info!("Hookline shutdown complete");

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hookline=debug", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
