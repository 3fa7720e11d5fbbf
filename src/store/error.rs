use crate::model::{ReservationId, Span, UnitId};
use crate::retry::Retryable;

/// Failures reported by a [`super::ReservationStore`].
///
/// Only [`StoreError::LockTimeout`], [`StoreError::SerializationFailure`] and
/// [`StoreError::Deadlock`] are transient. Everything else is terminal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("lock wait timeout exceeded on unit {0}")]
    LockTimeout(UnitId),

    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    #[error("deadlock detected: {0}")]
    Deadlock(String),

    #[error("unit not found: {0}")]
    UnitNotFound(UnitId),

    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("unit already exists: {0}")]
    UnitExists(UnitId),

    #[error("unit {0} is not locked by this transaction")]
    UnitNotLocked(UnitId),

    #[error("database error {code}: {message}")]
    Database { code: String, message: String },

    #[error("WAL error: {0}")]
    Wal(String),
}

/// SQLSTATE a row-level check constraint reports.
pub const CHECK_VIOLATION: &str = "23514";
/// SQLSTATE the overlap exclusion constraint reports.
pub const EXCLUSION_VIOLATION: &str = "23P01";

impl StoreError {
    pub fn check_violation(message: impl Into<String>) -> Self {
        StoreError::Database {
            code: CHECK_VIOLATION.to_string(),
            message: message.into(),
        }
    }

    pub fn exclusion_violation(unit_id: UnitId, span: Span) -> Self {
        StoreError::Database {
            code: EXCLUSION_VIOLATION.to_string(),
            message: format!("reservation {span} overlaps a live reservation on unit {unit_id}"),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout(_) | StoreError::SerializationFailure(_) | StoreError::Deadlock(_)
        )
    }

    /// Classify a PostgreSQL SQLSTATE for adapters backed by a relational store.
    ///
    /// `55P03` lock_not_available, `40001` serialization_failure and `40P01`
    /// deadlock_detected are transient. `unit_id` is the unit whose lock was
    /// being taken when the error surfaced.
    pub fn from_sqlstate(code: &str, message: impl Into<String>, unit_id: UnitId) -> Self {
        let message = message.into();
        match code {
            "55P03" => StoreError::LockTimeout(unit_id),
            "40001" => StoreError::SerializationFailure(message),
            "40P01" => StoreError::Deadlock(message),
            _ => StoreError::Database {
                code: code.to_string(),
                message,
            },
        }
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}
