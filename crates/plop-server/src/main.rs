use std::sync::Arc;

use tracing::{info, warn};

use plop_api::cleanup;
use plop_db::Database;
use plop_gateway::fcm::FcmEscalator;
use plop_gateway::push::{DisabledEscalator, PushEscalator};
use plop_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plop=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let db = Arc::new(Database::open(&config.db_path)?);

    let escalator: Arc<dyn PushEscalator> = match &config.fcm {
        Some(fcm) => {
            info!("Push escalation via FCM project {}", fcm.project_id);
            Arc::new(FcmEscalator::new(fcm.clone(), db.clone())?)
        }
        None => {
            warn!("FCM not configured, offline plops will be queued without push");
            Arc::new(DisabledEscalator)
        }
    };

    let state = plop_server::assemble(db, &config, escalator);
    tokio::spawn(cleanup::run_cleanup_loop(state.app.clone(), config.cleanup_interval));

    let app = plop_server::build_app(state.clone());
    let addr = config.listen_addr()?;
    info!("Plop relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let queued persistence and pushes finish before exiting.
    let tasks = state.router.offline().tasks();
    tasks.close();
    info!("Waiting for {} background task(s)", tasks.len());
    tasks.wait().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
