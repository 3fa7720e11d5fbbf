use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations committed. Labels: op (create, update, cancel).
pub const RESERVATION_WRITES_TOTAL: &str = "rentlock_reservation_writes_total";

/// Counter: requests rejected because the unit is taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "rentlock_booking_conflicts_total";

/// Counter: transient store failures that were retried. Labels: op.
pub const RETRIES_TOTAL: &str = "rentlock_retries_total";

/// Counter: operations that exhausted their retry budget. Labels: op.
pub const LOCKING_FAILURES_TOTAL: &str = "rentlock_locking_failures_total";

/// Histogram: end-to-end duration of a locked write in seconds. Labels: op.
pub const LOCKED_WRITE_DURATION_SECONDS: &str = "rentlock_locked_write_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent waiting for a unit row lock, in seconds.
pub const UNIT_LOCK_WAIT_SECONDS: &str = "rentlock_unit_lock_wait_seconds";

/// Counter: unit lock waits that hit the lock-wait timeout.
pub const UNIT_LOCK_TIMEOUTS_TOTAL: &str = "rentlock_unit_lock_timeouts_total";

/// Counter: status transitions applied by the sweeper.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "rentlock_sweep_transitions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentlock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentlock_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
