//! Warden API Server
//!
//! Configuration comes from the TOML file named by `WARDEN_CONFIG` (if set)
//! with environment variables taking precedence.

use anyhow::Context;
use std::sync::Arc;
use warden_api::{create_router, delivery::LogDelivery, state::AppState};
use warden_core::{AppConfig, StoreBackend, SystemClock};
use warden_store::{CredentialStore, MemoryCredentialStore, SurrealCredentialStore, TimeoutStore};

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("WARDEN_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json_format {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let inner: Arc<dyn CredentialStore> = match config.database.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory credential store; accounts are lost on restart");
            Arc::new(MemoryCredentialStore::new())
        }
        StoreBackend::SurrealDb => {
            let store = SurrealCredentialStore::new(&config.database)
                .await
                .context("connecting to SurrealDB")?;
            store.init_schema().await?;
            tracing::info!(url = %config.database.surrealdb_url, "Connected to SurrealDB");
            Arc::new(store)
        }
    };

    Ok(Arc::new(TimeoutStore::new(inner, config.database.timeout())))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config);

    // A missing signing secret stops the process before the listener binds
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let store = connect_store(&config).await?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::new(
        config,
        store,
        Arc::new(LogDelivery),
        Arc::new(SystemClock),
    )?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Warden API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
