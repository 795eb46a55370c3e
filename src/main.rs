//! velvetd — event-management backend with the Velvet Hour matchmaking engine.

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use velvetd::clock::{Clock, SystemClock};
use velvetd::config::Config;
use velvetd::coordinator::Coordinator;
use velvetd::db::Database;
use velvetd::handlers::{router, AppState};
use velvetd::hub::Hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "velvetd.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    velvetd::metrics::register_metrics();

    // Initialize database
    let db = Database::new(&config.database.path).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Spawn the presence hub
    let hub = Hub::spawn(&config.hub, clock.clone());

    let coordinator = Arc::new(Coordinator::new(db.clone(), hub.clone(), clock.clone()));

    let state = AppState {
        db,
        hub,
        coordinator,
        clock,
    };

    let listener = tokio::net::TcpListener::bind(config.server.listen).await?;
    info!(addr = %config.server.listen, "velvetd listening");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
