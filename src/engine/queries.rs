use crate::limits::*;
use crate::model::*;
use crate::store::ReservationStore;

use super::conflict::{validate_query_window, validate_span};
use super::lifecycle::refresh_statuses;
use super::slots::free_slots;
use super::{BookingError, BookingService};

/// Booked time on one unit inside a query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitOccupancy {
    pub range: Span,
    /// Live reservations still awaiting payment.
    pub pending: usize,
    /// Confirmed or active reservations.
    pub confirmed: usize,
    /// Live reserved time, clipped to `range`.
    pub booked_ms: Ms,
}

impl UnitOccupancy {
    pub fn booked_hours(&self) -> f64 {
        self.booked_ms as f64 / HOUR_MS as f64
    }

    pub fn occupancy_percent(&self) -> f64 {
        self.booked_ms as f64 * 100.0 / self.range.duration_ms() as f64
    }

    pub fn availability_percent(&self) -> f64 {
        (100.0 - self.occupancy_percent()).max(0.0)
    }
}

impl<S: ReservationStore> BookingService<S> {
    /// Advisory availability check. Takes no lock, so the answer may be stale
    /// by the time the caller acts on it; writes re-check under the unit lock.
    pub async fn check_availability(
        &self,
        unit_id: UnitId,
        span: Span,
        exclude: Option<ReservationId>,
    ) -> Result<bool, BookingError> {
        validate_span(&span)?;
        let count = self.store.count_overlapping(unit_id, span, exclude).await?;
        Ok(count == 0)
    }

    /// Live reservations on the unit that overlap `span`, ordered by start.
    pub async fn list_conflicts(&self, unit_id: UnitId, span: Span) -> Result<Vec<Reservation>, BookingError> {
        validate_span(&span)?;
        Ok(self.store.list_reservations(unit_id, span).await?)
    }

    /// Free slots of `slot_duration_hours` inside `range`, filling each gap
    /// between live reservations with back-to-back slots.
    pub async fn enumerate_available_slots(
        &self,
        unit_id: UnitId,
        range: Span,
        slot_duration_hours: u32,
    ) -> Result<Vec<Span>, BookingError> {
        validate_query_window(&range)?;
        let slot_ms = slot_length(slot_duration_hours)?;

        let mut reservations = self.store.list_reservations(unit_id, range).await?;
        // Stored statuses may lag the clock; a finished reservation no longer blocks.
        refresh_statuses(&mut reservations, self.clock.now());
        let booked: Vec<Span> = reservations
            .iter()
            .filter(|r| r.is_live())
            .map(|r| r.span)
            .collect();
        Ok(free_slots(range, slot_ms, &booked))
    }

    /// How much of `range` the unit's live reservations take up. A reservation
    /// straddling the window counts only for the part inside it.
    pub async fn unit_occupancy(&self, unit_id: UnitId, range: Span) -> Result<UnitOccupancy, BookingError> {
        validate_query_window(&range)?;
        let mut reservations = self.store.list_reservations(unit_id, range).await?;
        refresh_statuses(&mut reservations, self.clock.now());

        let mut occupancy = UnitOccupancy {
            range,
            pending: 0,
            confirmed: 0,
            booked_ms: 0,
        };
        for r in reservations.iter().filter(|r| r.is_live()) {
            if r.status == ReservationStatus::Pending {
                occupancy.pending += 1;
            } else {
                occupancy.confirmed += 1;
            }
            if let Some(inside) = r.span.intersection(&range) {
                occupancy.booked_ms += inside.duration_ms();
            }
        }
        Ok(occupancy)
    }

    /// Free slots from the start of the current UTC day through `days` days.
    pub async fn upcoming_slots(
        &self,
        unit_id: UnitId,
        days: u32,
        slot_duration_hours: u32,
    ) -> Result<Vec<Span>, BookingError> {
        if days == 0 || days > MAX_UPCOMING_DAYS {
            return Err(BookingError::InvalidArgument(format!(
                "days must be in 1..={MAX_UPCOMING_DAYS}"
            )));
        }
        let now = self.clock.now();
        let start = now - now.rem_euclid(DAY_MS);
        let range = Span::new(start, start + days as Ms * DAY_MS);
        self.enumerate_available_slots(unit_id, range, slot_duration_hours)
            .await
    }
}

fn slot_length(hours: u32) -> Result<Ms, BookingError> {
    if hours == 0 || hours > MAX_SLOT_HOURS {
        return Err(BookingError::InvalidArgument(format!(
            "slot duration must be in 1..={MAX_SLOT_HOURS} hours"
        )));
    }
    Ok(hours as Ms * HOUR_MS)
}
