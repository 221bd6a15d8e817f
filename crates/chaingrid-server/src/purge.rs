use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use chaingrid_db::{Database, StagingStore};

/// Background task that prunes expired staged registrations and stale
/// token revocations.
///
/// Expiry is already enforced on read; this only keeps the tables small.
pub async fn run_purge_loop(db: Arc<Database>, staging: Arc<dyn StagingStore>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let now = Utc::now();
        match staging.purge_expired(now) {
            Ok(count) if count > 0 => info!("Purge: dropped {} expired staged registrations", count),
            Ok(_) => {}
            Err(e) => warn!("Staging purge error: {}", e),
        }

        match db.purge_revoked_tokens(now) {
            Ok(count) if count > 0 => info!("Purge: dropped {} stale token revocations", count),
            Ok(_) => {}
            Err(e) => warn!("Revocation purge error: {}", e),
        }
    }
}
