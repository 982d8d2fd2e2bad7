use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http_interface;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("badgerd starting");

    let config = config::Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        photos = %config.photo_root.display(),
        model = %config.model_path.display(),
        backend = ?config.backend,
        threshold = config.confidence_threshold,
        "configuration loaded"
    );

    let engine = engine::spawn_from_config(&config)?;
    let app = http_interface::router(engine);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "badgerd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("badgerd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received terminate signal"),
    }
}
