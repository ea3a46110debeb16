use anyhow::{Context, Result};
use researchflow_api::config::AppConfig;
use researchflow_api::routes::build_router;
use researchflow_api::state::AppState;
use researchflow_core::{ConfigLoader, TelemetryOptions, init_telemetry, metrics};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let app_config = AppConfig::from_env()?;
    let config = ConfigLoader::load(None)?;

    init_telemetry(TelemetryOptions::from(&config.logging))?;
    metrics::init_metrics_from_env("researchflow-api");

    let state = AppState::try_new(&config, app_config.max_concurrency)?;
    let app = build_router(state);

    let listener = TcpListener::bind(&app_config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", app_config.listen_addr))?;
    info!(
        addr = %app_config.listen_addr,
        max_concurrency = app_config.max_concurrency,
        "ResearchFlow API listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
