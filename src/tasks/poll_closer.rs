use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use log::{error, info};
use tokio::time::interval;

use crate::db::SqliteStore;
use crate::error::FinalizeError;
use crate::finalize::FinalizeManager;

pub async fn check_expired_polls_task(
    store: Arc<SqliteStore>,
    manager: Arc<FinalizeManager>,
    check_interval: StdDuration,
) {
    info!("Starting background task to finalize expired polls...");
    let mut interval = interval(check_interval);

    loop {
        interval.tick().await;
        let now = Utc::now();

        match store.expired_active_polls(now).await {
            Ok(expired) => {
                if expired.is_empty() {
                    continue;
                }
                info!("Found {} expired poll(s).", expired.len());
                for poll_id in expired {
                    let manager = Arc::clone(&manager);
                    // Spawn a separate task for each poll to avoid blocking the loop
                    tokio::spawn(async move {
                        match manager.finalize(&poll_id).await {
                            Ok(_) => info!("Finalized expired poll {poll_id}"),
                            // Another worker got there first; it will finish.
                            Err(FinalizeError::RetryLater) => {}
                            Err(e) => error!("Error finalizing expired poll {poll_id}: {e}"),
                        }
                    });
                }
            }
            Err(e) => {
                error!("Failed to query for expired polls: {e}");
            }
        }
    }
}
