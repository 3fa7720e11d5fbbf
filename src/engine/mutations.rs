use std::time::Instant;

use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::store::{ReservationStore, StoreTransaction};

use super::conflict::{validate_charges, validate_span};
use super::lifecycle::refreshed_status;
use super::{BookingError, BookingService};

impl<S: ReservationStore> BookingService<S> {
    pub async fn register_unit(&self, id: UnitId, name: Option<String>) -> Result<(), BookingError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(BookingError::InvalidArgument("unit name too long".into()));
        }
        self.store.register_unit(id, name).await?;
        info!(unit_id = %id, "unit registered");
        Ok(())
    }

    /// Create a pending reservation if `span` is free on the unit.
    pub async fn create_reservation(
        &self,
        unit_id: UnitId,
        span: Span,
        requester_id: RequesterId,
        duration_hours: u32,
        total_price: u64,
        booking_type: BookingType,
    ) -> Result<Reservation, BookingError> {
        validate_span(&span)?;
        validate_charges(duration_hours, total_price)?;

        let new = NewReservation {
            unit_id,
            requester_id,
            span,
            duration_hours,
            total_price,
            booking_type,
            created_at: self.clock.now(),
        };
        let started = Instant::now();
        let outcome = self.retry.run("create", |_| self.try_create(new.clone())).await;
        let reservation = self.finish("create", started, outcome)?;

        info!(
            reservation_id = %reservation.id,
            unit_id = %unit_id,
            span = %span,
            "reservation created"
        );
        Ok(reservation)
    }

    async fn try_create(&self, new: NewReservation) -> Result<Reservation, BookingError> {
        let mut tx = self.store.begin().await?;
        tx.lock_unit(new.unit_id).await?;
        if tx.count_overlapping(new.unit_id, new.span, None).await? > 0 {
            return Err(BookingError::BookingConflict {
                unit_id: new.unit_id,
                span: new.span,
            });
        }
        let reservation = tx.insert(new).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    /// Move a live reservation to a new interval. The reservation never
    /// conflicts with itself.
    pub async fn update_reservation_interval(
        &self,
        id: ReservationId,
        span: Span,
        duration_hours: u32,
        total_price: u64,
    ) -> Result<Reservation, BookingError> {
        validate_span(&span)?;
        validate_charges(duration_hours, total_price)?;

        let started = Instant::now();
        let outcome = self
            .retry
            .run("update", |_| self.try_update(id, span, duration_hours, total_price))
            .await;
        let reservation = self.finish("update", started, outcome)?;

        info!(reservation_id = %id, span = %span, "reservation rescheduled");
        Ok(reservation)
    }

    async fn try_update(
        &self,
        id: ReservationId,
        span: Span,
        duration_hours: u32,
        total_price: u64,
    ) -> Result<Reservation, BookingError> {
        let unit_id = self.unit_of(id).await?;
        let mut tx = self.store.begin().await?;
        tx.lock_unit(unit_id).await?;

        // Re-read under the lock: the status may have moved since the lookup.
        let current = tx
            .get_reservation(id)
            .await?
            .ok_or(BookingError::ReservationNotFound(id))?;
        // Rescheduling keeps the status, so a terminal reservation has no legal move.
        if current.status.is_terminal() {
            return Err(BookingError::InvalidTransition {
                id,
                from: current.status,
                to: current.status,
            });
        }
        if tx.count_overlapping(unit_id, span, Some(id)).await? > 0 {
            return Err(BookingError::BookingConflict { unit_id, span });
        }
        let updated = tx.update_interval(id, span, duration_hours, total_price).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Cancel a reservation, freeing its interval for new bookings.
    pub async fn cancel_reservation(
        &self,
        id: ReservationId,
        reason: Option<String>,
    ) -> Result<Reservation, BookingError> {
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(BookingError::InvalidArgument("cancellation reason too long".into()));
        }

        let started = Instant::now();
        let outcome = self.retry.run("cancel", |_| self.try_cancel(id, reason.clone())).await;
        let reservation = self.finish("cancel", started, outcome)?;

        info!(reservation_id = %id, unit_id = %reservation.unit_id, "reservation cancelled");
        Ok(reservation)
    }

    async fn try_cancel(&self, id: ReservationId, reason: Option<String>) -> Result<Reservation, BookingError> {
        let unit_id = self.unit_of(id).await?;
        let mut tx = self.store.begin().await?;
        tx.lock_unit(unit_id).await?;
        let current = tx
            .get_reservation(id)
            .await?
            .ok_or(BookingError::ReservationNotFound(id))?;
        let to = ReservationStatus::Cancelled;
        if !current.status.can_transition_to(to) {
            return Err(BookingError::InvalidTransition { id, from: current.status, to });
        }
        let cancelled = tx.set_status(id, to, Some(self.clock.now()), reason).await?;
        tx.commit().await?;
        Ok(cancelled)
    }

    /// Record the payment collaborator's verdict. A paid pending reservation
    /// is confirmed in the same transaction.
    pub async fn record_payment(
        &self,
        id: ReservationId,
        payment_status: PaymentStatus,
    ) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let outcome = self
            .retry
            .run("payment", |_| self.try_record_payment(id, payment_status))
            .await;
        let reservation = self.finish("payment", started, outcome)?;

        info!(
            reservation_id = %id,
            payment_status = %payment_status,
            status = %reservation.status,
            "payment recorded"
        );
        Ok(reservation)
    }

    async fn try_record_payment(
        &self,
        id: ReservationId,
        payment_status: PaymentStatus,
    ) -> Result<Reservation, BookingError> {
        let unit_id = self.unit_of(id).await?;
        let mut tx = self.store.begin().await?;
        tx.lock_unit(unit_id).await?;
        let current = tx
            .get_reservation(id)
            .await?
            .ok_or(BookingError::ReservationNotFound(id))?;
        let mut updated = tx.set_payment_status(id, payment_status).await?;
        if payment_status == PaymentStatus::Paid && current.status == ReservationStatus::Pending {
            updated = tx.set_status(id, ReservationStatus::Confirmed, None, None).await?;
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// Persist passive lifecycle transitions for one unit. Returns how many
    /// reservations changed.
    pub async fn refresh_unit_statuses(&self, unit_id: UnitId) -> Result<usize, BookingError> {
        let started = Instant::now();
        let outcome = self.retry.run("refresh", |_| self.try_refresh(unit_id)).await;
        let changed = self.finish("refresh", started, outcome)?;
        if changed > 0 {
            debug!(unit_id = %unit_id, changed, "statuses refreshed");
        }
        Ok(changed)
    }

    async fn try_refresh(&self, unit_id: UnitId) -> Result<usize, BookingError> {
        let mut tx = self.store.begin().await?;
        tx.lock_unit(unit_id).await?;
        // Committed state is stable while we hold the unit lock.
        let reservations = self.store.list_unit_reservations(unit_id).await?;
        let now = self.clock.now();
        let mut changed = 0;
        for r in &reservations {
            if let Some(next) = refreshed_status(r, now) {
                tx.set_status(r.id, next, None, None).await?;
                changed += 1;
            }
        }
        if changed > 0 {
            tx.commit().await?;
        }
        Ok(changed)
    }

    async fn unit_of(&self, id: ReservationId) -> Result<UnitId, BookingError> {
        self.store
            .get_reservation(id)
            .await?
            .map(|r| r.unit_id)
            .ok_or(BookingError::ReservationNotFound(id))
    }
}
