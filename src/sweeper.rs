use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::BookingService;
use crate::store::{InMemoryStore, ReservationStore};

/// Background task that periodically persists passive status transitions
/// (confirmed → active → completed) for every unit.
pub async fn run_sweeper<S: ReservationStore>(service: Arc<BookingService<S>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        sweep_once(&service).await;
    }
}

/// One pass over all units. A unit whose lock can't be taken is skipped
/// until the next pass. Returns the number of reservations moved.
pub async fn sweep_once<S: ReservationStore>(service: &BookingService<S>) -> usize {
    let units = match service.store().unit_ids().await {
        Ok(units) => units,
        Err(e) => {
            warn!("sweeper could not list units: {e}");
            return 0;
        }
    };
    let mut total = 0;
    for unit_id in units {
        match service.refresh_unit_statuses(unit_id).await {
            Ok(0) => {}
            Ok(n) => {
                info!(unit_id = %unit_id, transitions = n, "sweeper refreshed statuses");
                metrics::counter!(crate::observability::SWEEP_TRANSITIONS_TOTAL).increment(n as u64);
                total += n;
            }
            Err(e) => debug!("sweeper skip {unit_id}: {e}"),
        }
    }
    total
}

/// Background task that compacts the WAL once enough commits have piled up.
pub async fn run_compactor(store: InMemoryStore, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_due(store: &InMemoryStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!(appends, "compacted reservation WAL");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}
