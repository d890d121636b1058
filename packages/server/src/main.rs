use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mq::{MemoryBus, MessageBus, RedisBus};
use tracing::info;
use tracing_subscriber::EnvFilter;

use server::config::AppConfig;
use server::database::init_db;
use server::state::Services;

/// Time running jobs get to finish after the listener closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},{}",
            config.log.level,
            config.imaging.filter_directive()
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db = init_db(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected and schema synced");

    let (bus, durable): (Arc<dyn MessageBus>, bool) = if config.mq.enabled {
        let bus = RedisBus::connect(&config.mq)
            .await
            .context("Failed to connect to message broker")?;
        info!(url = %config.mq.url, "Using Redis message bus");
        (Arc::new(bus), true)
    } else {
        info!("Message broker disabled, using in-process bus");
        (Arc::new(MemoryBus::new()), false)
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let services = Services::build(config, db, bus, durable).await?;
    services.start();

    let app = server::build_router(services.state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server running at http://{}", addr);
    info!("Swagger UI: http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down background work");
    services.shutdown(SHUTDOWN_GRACE).await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
