use durogate::config::{Config, EngineType};
use durogate::server::{GatewayServer, PKG_NAME, VERSION};
use durogate::state::GatewayState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "durogate.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("durogate=debug".parse()?),
        )
        .init();

    // Load configuration. An explicit path must exist; the default may not.
    let explicit_path = std::env::args().nth(1).map(PathBuf::from);
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = if explicit_path.is_none() && !config_path.exists() {
        warn!(path = %config_path.display(), "No configuration file, using defaults");
        Config::from_env()
    } else {
        Config::load(&config_path)
    }
    .map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");

    print_startup_banner(&config);

    let state = Arc::new(GatewayState::from_config(&config)?);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = GatewayServer::new(addr, state, shutdown_rx);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(
        name = PKG_NAME,
        version = VERSION,
        "Starting orchestration gateway"
    );
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        custom_domain = config.server.custom_domain.as_deref(),
        max_body_bytes = config.server.max_body_bytes,
        "Server configuration"
    );
    match config.engine.engine_type {
        EngineType::Durable => info!(
            base_url = %config.engine.base_url,
            task_hub = config.engine.task_hub.as_deref(),
            connection = config.engine.connection.as_deref(),
            system_key = config.engine.system_key.is_some(),
            timeout_secs = config.engine.timeout_secs,
            "Durable Task engine"
        ),
        EngineType::Memory => info!(
            capacity = config.engine.memory_capacity,
            timeout_secs = config.engine.timeout_secs,
            "In-memory engine"
        ),
    }
    for warning in config.warnings() {
        warn!("{}", warning);
    }
    if config.orchestrations.allowed.is_empty() {
        info!("All orchestration names accepted");
    } else {
        info!(allowed = ?config.orchestrations.allowed, "Allowed orchestrations");
    }
}
