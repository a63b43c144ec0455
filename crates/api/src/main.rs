//! Beacon API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use beacon_common::config::AppConfig;
use beacon_common::db::{create_pool, run_migrations};
use beacon_notifier::backend::{HttpPushBackend, PushBackend, UnconfiguredBackend};
use beacon_notifier::service::{NotificationService, NotifierConfig};
use beacon_notifier::store::PgNotificationStore;

use beacon_api::routes::create_router;
use beacon_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("beacon_api=debug,beacon_notifier=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Beacon API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let backend: Arc<dyn PushBackend> = match &config.push_endpoint_url {
        Some(endpoint) => Arc::new(HttpPushBackend::new(
            endpoint.clone(),
            config.push_api_key.clone(),
            Duration::from_millis(config.push_timeout_ms),
        )?),
        None => {
            tracing::warn!("PUSH_ENDPOINT_URL not set, every delivery will fail as not configured");
            Arc::new(UnconfiguredBackend)
        }
    };

    let notifier = Arc::new(NotificationService::new(
        NotifierConfig::try_from(&config)?,
        Arc::new(PgNotificationStore::new(pool)),
        backend,
    ));
    let handle = notifier.start();

    // Pick up failures whose retry timers died with the previous process.
    if let Err(e) = notifier.retry_failed_notifications().await {
        tracing::error!(error = %e, "Startup retry sweep failed");
    }

    let app = create_router(AppState::new(notifier))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    handle.shutdown().await;
    tracing::info!("Beacon API server stopped.");
    Ok(())
}
