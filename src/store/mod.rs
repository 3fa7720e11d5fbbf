//! Persistence boundary for reservations.
//!
//! All mutations go through a [`StoreTransaction`] opened by the caller. The
//! store never commits on its own: [`StoreTransaction::commit`] publishes the
//! staged writes, and dropping a transaction rolls it back and releases every
//! unit lock it holds.

mod error;
mod memory;

pub use error::{StoreError, CHECK_VIOLATION, EXCLUSION_VIOLATION};
pub use memory::{InMemoryStore, MemoryTransaction};

use async_trait::async_trait;

use crate::model::*;

#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    type Tx: StoreTransaction + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Stand-in for the unit-management collaborator.
    async fn register_unit(&self, id: UnitId, name: Option<String>) -> Result<(), StoreError>;

    async fn unit_ids(&self) -> Result<Vec<UnitId>, StoreError>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Lock-free read of committed state. Counts live reservations on
    /// `unit_id` overlapping `span`, skipping `exclude`.
    async fn count_overlapping(
        &self,
        unit_id: UnitId,
        span: Span,
        exclude: Option<ReservationId>,
    ) -> Result<usize, StoreError>;

    /// Live reservations overlapping `range`, ordered by start ascending.
    async fn list_reservations(&self, unit_id: UnitId, range: Span) -> Result<Vec<Reservation>, StoreError>;

    /// Every reservation on the unit regardless of status, ordered by start.
    async fn list_unit_reservations(&self, unit_id: UnitId) -> Result<Vec<Reservation>, StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// Pessimistic row lock on the unit, held until commit or rollback.
    /// Re-locking a unit already held by this transaction is a no-op.
    async fn lock_unit(&mut self, unit_id: UnitId) -> Result<UnitHandle, StoreError>;

    /// Reads through this transaction's staged writes.
    async fn get_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Same filter as [`ReservationStore::count_overlapping`], including staged writes.
    async fn count_overlapping(
        &mut self,
        unit_id: UnitId,
        span: Span,
        exclude: Option<ReservationId>,
    ) -> Result<usize, StoreError>;

    /// Rejects a row with an empty span or a zero price or duration
    /// ([`CHECK_VIOLATION`]), and a live row overlapping another live row on the
    /// same unit ([`EXCLUSION_VIOLATION`]).
    async fn insert(&mut self, new: NewReservation) -> Result<Reservation, StoreError>;

    /// Same constraints as [`StoreTransaction::insert`].
    async fn update_interval(
        &mut self,
        id: ReservationId,
        span: Span,
        duration_hours: u32,
        total_price: u64,
    ) -> Result<Reservation, StoreError>;

    /// `at` and `reason` are recorded only for cancellations.
    async fn set_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
        at: Option<Ms>,
        reason: Option<String>,
    ) -> Result<Reservation, StoreError>;

    async fn set_payment_status(
        &mut self,
        id: ReservationId,
        payment_status: PaymentStatus,
    ) -> Result<Reservation, StoreError>;

    /// Once the first poll has started publishing, the commit completes even if
    /// the returned future is dropped.
    async fn commit(self) -> Result<(), StoreError>;
}
