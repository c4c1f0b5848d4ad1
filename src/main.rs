use expense_tracker::api::{create_router, AppState};
use expense_tracker::config::{Settings, StorageBackend};
use expense_tracker::error::Result;
use expense_tracker::idempotency::{IdempotencyCache, IdempotencyCleanupJob};
use expense_tracker::observability::{init_logging, init_metrics, LogConfig};
use expense_tracker::repositories::{
    ExpenseRepository, InMemoryExpenseRepository, PostgresExpenseRepository,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    init_logging(&LogConfig::from_settings(&settings.application));
    info!("Configuration loaded");

    let repo: Arc<dyn ExpenseRepository> = match settings.database.backend {
        StorageBackend::Postgres => {
            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.pool_size)
                .acquire_timeout(Duration::from_secs(5))
                .connect(&settings.database.url)
                .await?;
            info!("Database connection established");

            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Migrations applied successfully");

            Arc::new(PostgresExpenseRepository::new(pool))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory expense store; data is lost on restart");
            Arc::new(InMemoryExpenseRepository::new())
        }
    };

    let idempotency = Arc::new(IdempotencyCache::new(
        settings.idempotency.to_cache_config(),
    ));
    let cleanup = IdempotencyCleanupJob::new(
        Arc::clone(&idempotency),
        settings.idempotency.sweep_interval(),
    )
    .start();

    let mut state = AppState::new(repo, idempotency);
    if settings.application.metrics_enabled {
        state = state.with_metrics(init_metrics()?);
        info!("Prometheus metrics enabled at /metrics");
    }

    let app = create_router(state);

    let addr = settings.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(anyhow::Error::from)?;
    info!("Expense tracker listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(anyhow::Error::from)?;

    cleanup.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
