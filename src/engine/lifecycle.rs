use crate::model::*;

/// The status a paid reservation should have at `now`, if it differs from the
/// current one. Terminal and unpaid reservations never move passively.
pub fn refreshed_status(r: &Reservation, now: Ms) -> Option<ReservationStatus> {
    if r.payment_status != PaymentStatus::Paid || r.status.is_terminal() {
        return None;
    }
    if now >= r.span.end {
        (r.status != ReservationStatus::Completed).then_some(ReservationStatus::Completed)
    } else if r.span.contains_instant(now) && r.status == ReservationStatus::Confirmed {
        Some(ReservationStatus::Active)
    } else {
        None
    }
}

/// Passive lifecycle housekeeping for reservation lists read from the store.
/// Idempotent. Returns how many reservations changed.
pub fn refresh_statuses(reservations: &mut [Reservation], now: Ms) -> usize {
    let mut changed = 0;
    for r in reservations.iter_mut() {
        if let Some(next) = refreshed_status(r, now) {
            r.status = next;
            changed += 1;
        }
    }
    changed
}
