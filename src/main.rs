use anyhow::Context;
use conduit_gate::{
    AppState, MemoryRepository, PostgresRepository, RepositoryState,
    config::{AppConfig, Env},
    create_router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Startup order: configuration, logging, storage, schema, then the HTTP server. Any
/// failure before the listener is bound stops the process; no request is ever served
/// against an unverified schema.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = AppConfig::load().context("invalid configuration")?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "conduit_gate=debug,tower_http=info".into());

    // Pretty output locally, JSON for log aggregation in production.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);
    if config.uses_development_secret() {
        tracing::warn!("using the local development JWT secret, set JWT_SECRET to replace it");
    }

    let repo: RepositoryState = if config.uses_memory_store() {
        tracing::warn!("using the in-memory repository, data is lost on exit");
        Arc::new(MemoryRepository::new())
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres, check DATABASE_URL")?;
        Arc::new(PostgresRepository::new(pool))
    };

    if let Err(err) = repo.ensure_schema().await {
        tracing::error!(error = %err, "schema could not be ensured, refusing to serve");
        return Err(anyhow::Error::new(err).context("schema could not be ensured"));
    }

    let bind_addr = config.bind_addr;
    let app = create_router(AppState::new(config, repo));

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("Listening on {bind_addr}");
    tracing::info!("API Documentation (Swagger UI) available at: http://{bind_addr}/swagger-ui");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
