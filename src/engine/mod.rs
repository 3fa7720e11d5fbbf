mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod slots;

pub use conflict::overlaps;
pub use error::BookingError;
pub use lifecycle::{refresh_statuses, refreshed_status};
pub use queries::UnitOccupancy;
pub use slots::free_slots;

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::config::BookingConfig;
use crate::model::Ms;
use crate::retry::{RetryError, RetryPolicy};
use crate::store::ReservationStore;

/// Serializes reservation writes per unit and answers availability queries.
///
/// Every write runs as: open a transaction, lock the unit, check overlap under
/// the lock, stage the write, commit. Transient lock failures are retried with
/// exponential backoff; everything else surfaces immediately.
pub struct BookingService<S: ReservationStore> {
    store: S,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: ReservationStore> BookingService<S> {
    pub fn new(store: S, config: &BookingConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: &BookingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            retry: config.retry_policy(),
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Unwrap a retry outcome into the booking taxonomy and record metrics.
    /// An exhausted budget becomes `LockingFailure` carrying the last cause.
    fn finish<T>(
        &self,
        op: &'static str,
        started: Instant,
        outcome: Result<T, RetryError<BookingError>>,
    ) -> Result<T, BookingError> {
        metrics::histogram!(crate::observability::LOCKED_WRITE_DURATION_SECONDS, "op" => op)
            .record(started.elapsed().as_secs_f64());
        match outcome {
            Ok(v) => {
                metrics::counter!(crate::observability::RESERVATION_WRITES_TOTAL, "op" => op).increment(1);
                Ok(v)
            }
            Err(RetryError::Terminal(e)) => {
                if matches!(e, BookingError::BookingConflict { .. }) {
                    metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL, "op" => op).increment(1);
                }
                Err(e)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                metrics::counter!(crate::observability::LOCKING_FAILURES_TOTAL, "op" => op).increment(1);
                warn!(op, attempts, "retry budget exhausted: {last}");
                match last {
                    BookingError::Store(last) => Err(BookingError::LockingFailure { attempts, last }),
                    other => Err(other),
                }
            }
        }
    }
}
