//! Scene server binary.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `noodles-config.yaml`
//! 3. Build the scene and register the demo methods
//! 4. Spawn the hub task
//! 5. Serve `WebSocket` sessions until `Ctrl-C`
//! 6. Stop the hub

use std::path::Path;
use std::sync::Arc;

use noodles_core::{Scene, ServerConfig};
use noodles_server::{demo, AppError, AppState, Hub, SessionConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "noodles-config.yaml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("noodles-server starting");

    let config = load_config()?;
    info!(
        host = %config.host,
        port = config.port,
        intro_timeout_ms = config.intro_timeout_ms,
        invoke_timeout_ms = ?config.invoke_timeout_ms,
        outbound_queue_capacity = config.outbound_queue_capacity,
        "Configuration loaded"
    );

    let mut scene = Scene::new(&config).map_err(AppError::from)?;
    let point_plot = demo::install(&mut scene).map_err(AppError::from)?;
    info!(method = %point_plot, "Demo methods registered");

    let (hub, hub_task) = Hub::spawn(scene, config.hub_queue_capacity);
    let state = Arc::new(AppState::new(hub.clone(), SessionConfig::from_server(&config)));

    let served = noodles_server::start_server(&config, state).await;

    if hub.shutdown().await.is_err() {
        warn!("hub already stopped");
    }
    match hub_task.await {
        Ok(scene) => info!(components = scene.registry().len(), "noodles-server stopped"),
        Err(e) => warn!(error = %e, "hub task failed"),
    }

    served.map_err(AppError::from)?;
    Ok(())
}

/// Load configuration from `noodles-config.yaml`, falling back to defaults
/// when the file does not exist.
fn load_config() -> Result<ServerConfig, AppError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok(ServerConfig::from_file(config_path)?)
    } else {
        info!("Config file not found, using defaults");
        let mut config = ServerConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}
