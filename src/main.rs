// Build task service - HTTP entry point

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use build_task_service::{app_state::AppState, build_interface::create_build_router, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let app_state = AppState::new(config.clone()).await?;

    let app = Router::new()
        .nest("/api", create_build_router(app_state.clone()))
        .layer(CorsLayer::permissive());

    let addr = config.server_address();
    info!(
        %addr,
        database = %config.database.url,
        failure_policy = %config.execution.failure_policy,
        "Build task service starting"
    );

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    app_state.shutdown().await;
    Ok(())
}
