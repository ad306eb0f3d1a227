// Main entry point for the dispatch server

use std::sync::Arc;

use anyhow::{Context, Result};
use dispatch_core::domains::fanout::{run_consumers, ConsumerTable};
use dispatch_core::domains::helpers::{InMemoryHelperStore, PostgresHelperStore};
use dispatch_core::domains::spatial::HexGrid;
use dispatch_core::domains::tasks::actions::{resume_pending_dispatches, MatchAndDispatch};
use dispatch_core::domains::tasks::{InMemoryTaskStore, PostgresTaskStore};
use dispatch_core::kernel::{
    scheduled_tasks::start_scheduler, Collaborators, InMemoryBroker, JetStreamBroker,
    LoggingLedgerService, LoggingPushService, PostgresSkillCatalog, ServerDeps,
    StaticSkillCatalog,
};
use dispatch_core::server::{auth::JwtService, build_app, AppState};
use dispatch_core::{Config, StoreBackend};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatch_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting dispatch server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(backend = ?config.store_backend, "Configuration loaded");

    let (collaborators, db_pool) = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = connect_database(&config.database_url).await?;
            (postgres_collaborators(&config, pool.clone()).await?, Some(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores and broker; nothing survives a restart");
            (memory_collaborators(&config), None)
        }
    };

    let (deps, workers) = ServerDeps::new(collaborators, config.dispatch.clone());
    let shutdown = CancellationToken::new();

    // Matching worker pool
    let job = Arc::new(MatchAndDispatch::new(deps.clone()));
    let workers_handle = tokio::spawn(workers.run(job, shutdown.clone()));

    // Tasks queued or mid-match when the last process stopped
    let resume_deps = deps.clone();
    tokio::spawn(async move {
        if let Err(e) = resume_pending_dispatches(&resume_deps).await {
            tracing::error!(error = %e, "Failed to resume pending dispatches");
        }
    });

    // Broker consumers
    let consumers = run_consumers(deps.clone(), ConsumerTable::standard(), shutdown.clone())
        .await
        .context("Failed to start broker consumers")?;
    tracing::info!(count = consumers.len(), "Broker consumers started");

    // Periodic sweeps
    let mut scheduler = start_scheduler(deps.clone())
        .await
        .context("Failed to start scheduler")?;

    let state = AppState {
        deps,
        jwt_service: Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone())),
        db_pool,
    };
    let app = build_app(state, &config.allowed_origins);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Scheduler did not stop cleanly");
    }
    for consumer in consumers {
        let _ = consumer.await;
    }
    let _ = workers_handle.await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn connect_database(database_url: &str) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    Ok(pool)
}

async fn postgres_collaborators(config: &Config, pool: PgPool) -> Result<Collaborators> {
    let client = async_nats::connect(&config.nats_url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats_url))?;
    let broker = JetStreamBroker::connect(client, config.dispatch.broker_max_deliver)
        .await
        .context("Failed to prepare JetStream")?;

    Ok(Collaborators {
        tasks: Arc::new(PostgresTaskStore::new(pool.clone())),
        helpers: Arc::new(PostgresHelperStore::new(pool.clone())),
        skills: Arc::new(PostgresSkillCatalog::new(pool)),
        spatial: Arc::new(HexGrid::new()),
        broker: Arc::new(broker),
        push_service: Arc::new(LoggingPushService),
        ledger: Arc::new(LoggingLedgerService),
    })
}

fn memory_collaborators(config: &Config) -> Collaborators {
    Collaborators {
        tasks: Arc::new(InMemoryTaskStore::new()),
        helpers: Arc::new(InMemoryHelperStore::new()),
        skills: Arc::new(StaticSkillCatalog::allow_all()),
        spatial: Arc::new(HexGrid::new()),
        broker: Arc::new(InMemoryBroker::new(config.dispatch.broker_max_deliver)),
        push_service: Arc::new(LoggingPushService),
        ledger: Arc::new(LoggingLedgerService),
    }
}
