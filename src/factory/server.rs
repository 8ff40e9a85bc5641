use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{StatusCode, Uri},
    response::IntoResponse,
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::api::{self, AppState};
use super::db::{DbHandle, FactoryDb};
use super::llm::GeminiClient;
use crate::config::AppConfig;

/// Configuration for the factory server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            db_path: PathBuf::from(".appfoundry/appfoundry.db"),
            dev_mode: false,
        }
    }
}

impl ServerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.database.path.clone(),
            dev_mode: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router().fallback(not_found).with_state(state)
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({"error": format!("No route for {}", uri.path())})),
    )
}

/// Start the factory server.
pub async fn start_server(config: ServerConfig, settings: AppConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = FactoryDb::new(&config.db_path).context("Failed to initialize factory database")?;
    let generator = GeminiClient::new(&settings.generation)
        .context("Failed to build text generation client")?;
    if settings.generation.api_key.is_none() {
        info!("No fallback API key set; generation uses the stored configuration key");
    }
    if settings.scheduler.cron_secret.is_none() {
        warn!("No cron secret configured; /api/cron will reject every request");
    }

    let state = Arc::new(AppState::new(DbHandle::new(db), Arc::new(generator), &settings));
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { config.host.as_str() };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, db = %config.db_path.display(), "Server listening");
    println!("AppFoundry running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
