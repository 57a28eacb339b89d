//! Web server for the demand dashboard and the read-only JSON API.
//!
//! - `/` renders store statistics, model quality and tread-pattern recommendations
//! - `/api/*` serves products, forecasts, analytics and trend series as JSON

mod handlers;
mod routes;
mod templates;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::storage::Store;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn with_store(store: Store, config: AppConfig) -> Self {
        Self {
            store: Arc::new(store),
            config: Arc::new(config),
        }
    }
}

/// Start the web server on an already opened store.
pub async fn serve(store: Store, config: &AppConfig, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::with_store(store, config.clone());
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("🌐 Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
