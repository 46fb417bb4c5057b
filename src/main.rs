//! Process entry point (C12): reads settings, wires up the data plane, and
//! serves the ingress router until shutdown.

use gateway::ingress;
use gateway::settings::Settings;
use gateway::state::GatewayState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env();
    settings.init_tracing();

    tracing::info!(bind_addr = %settings.bind_addr, "starting gateway");

    let state = GatewayState::bootstrap(&settings).await?;
    let router = ingress::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(bind_addr = %settings.bind_addr, "gateway listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
