use std::time::{Duration, Instant};

use tracing::{info, warn};

use plop_gateway::store::blocking;

use crate::AppState;

/// Periodically prunes expired invitations and sync codes.
pub async fn run_cleanup_loop(state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match sweep_expired(&state).await {
            Ok((invitations, sync_codes)) => {
                if invitations + sync_codes > 0 {
                    info!(
                        "Cleanup: pruned {} invitation(s) and {} sync code(s)",
                        invitations, sync_codes
                    );
                }
            }
            Err(e) => warn!("Cleanup error: {:#}", e),
        }
    }
}

pub async fn sweep_expired(state: &AppState) -> anyhow::Result<(usize, usize)> {
    let sync_codes = state.sync_codes.sweep(Instant::now());

    let db = state.db.clone();
    let now = chrono::Utc::now().timestamp();
    let invitations = blocking(move || db.delete_expired_invitations(now)).await?;

    Ok((invitations, sync_codes))
}
