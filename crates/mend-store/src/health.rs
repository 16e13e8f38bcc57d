//! Startup health gating for the persistence store

use crate::document::DocumentStore;
use mend_common::{Error, Result};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Block until the document store answers a probe read, or fail fatally
/// once the startup grace period is spent. A store that stays unreachable
/// past the grace window is a fatal condition, not something to heal.
pub async fn await_ready(store: &dyn DocumentStore, grace: Duration) -> Result<()> {
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match store.get("health", "probe").await {
            Ok(_) => {
                info!(attempt, "persistence store reachable");
                return Ok(());
            }
            Err(e) if started.elapsed() >= grace => {
                return Err(Error::Store(format!(
                    "persistence store unreachable after {}s startup grace: {e}",
                    grace.as_secs()
                )));
            }
            Err(e) => {
                warn!(attempt, "persistence store not ready: {e}");
                tokio::time::sleep(PROBE_INTERVAL.min(grace)).await;
            }
        }
    }
}
