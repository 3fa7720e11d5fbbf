use crate::model::{ReservationId, ReservationStatus, Span, UnitId};
use crate::retry::Retryable;
use crate::store::StoreError;

/// Closed error taxonomy for booking operations.
///
/// Callers branch on the kind: `BookingConflict` means "not available for the
/// selected time", `LockingFailure` means "please try again", `InvalidArgument`
/// and the not-found variants call for corrected input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unit not found: {0}")]
    UnitNotFound(UnitId),

    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("unit {unit_id} is not available for {span}")]
    BookingConflict { unit_id: UnitId, span: Span },

    #[error("reservation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("locking failed after {attempts} attempts: {last}")]
    LockingFailure {
        attempts: u32,
        #[source]
        last: StoreError,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl BookingError {
    /// True only when the caller may simply try the same request again.
    pub fn is_retryable_by_caller(&self) -> bool {
        matches!(self, BookingError::LockingFailure { .. })
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnitNotFound(id) => BookingError::UnitNotFound(id),
            StoreError::ReservationNotFound(id) => BookingError::ReservationNotFound(id),
            other => BookingError::Store(other),
        }
    }
}

/// Drives the retry loop: only transient store errors get another attempt.
impl Retryable for BookingError {
    fn is_transient(&self) -> bool {
        matches!(self, BookingError::Store(e) if e.is_transient())
    }
}
