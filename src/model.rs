use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub type UnitId = Ulid;
pub type ReservationId = Ulid;
pub type RequesterId = u64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Unchecked. Booking operations reject an empty or inverted span with
    /// `InvalidArgument`; use [`Span::try_new`] to check up front.
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// The part of `self` inside `other`, if any.
    pub fn intersection(&self, other: &Span) -> Option<Span> {
        Span::try_new(self.start.max(other.start), self.end.min(other.end))
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `[a, b)` and `[c, d)` overlap iff `a < d && b > c`. Back-to-back spans don't.
    pub fn overlaps(&self, other: &Span) -> bool {
        crate::engine::overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Reservation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Whether a reservation in this state consumes the unit's timeline.
    pub fn occupies_unit(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed | Self::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// The only legal lifecycle mutations.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Completed | Cancelled)
                | (Confirmed, Active | Completed | Cancelled)
                | (Active, Completed | Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set by the payment collaborator only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        })
    }
}

/// Affects pricing upstream; irrelevant to overlap checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingType {
    Hourly,
    Daily,
}

/// A time-bounded claim on a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub unit_id: UnitId,
    pub requester_id: RequesterId,
    pub span: Span,
    pub duration_hours: u32,
    /// Minor currency units.
    pub total_price: u64,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub booking_type: BookingType,
    pub created_at: Ms,
    pub cancelled_at: Option<Ms>,
    pub cancellation_reason: Option<String>,
}

impl Reservation {
    pub fn is_live(&self) -> bool {
        self.status.occupies_unit()
    }
}

/// Fields supplied by the caller when staging an insert. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub unit_id: UnitId,
    pub requester_id: RequesterId,
    pub span: Span,
    pub duration_hours: u32,
    pub total_price: u64,
    pub booking_type: BookingType,
    pub created_at: Ms,
}

impl NewReservation {
    pub fn into_reservation(self, id: ReservationId) -> Reservation {
        Reservation {
            id,
            unit_id: self.unit_id,
            requester_id: self.requester_id,
            span: self.span,
            duration_hours: self.duration_hours,
            total_price: self.total_price,
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Pending,
            booking_type: self.booking_type,
            created_at: self.created_at,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }
}

/// Proof that the current transaction holds the unit's row lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitHandle {
    pub id: UnitId,
    pub name: Option<String>,
}

/// Journal record types, flat with no nesting. One commit is a `Vec<Event>` in the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UnitRegistered {
        id: UnitId,
        name: Option<String>,
    },
    ReservationInserted {
        reservation: Reservation,
    },
    IntervalUpdated {
        id: ReservationId,
        unit_id: UnitId,
        span: Span,
        duration_hours: u32,
        total_price: u64,
    },
    StatusChanged {
        id: ReservationId,
        unit_id: UnitId,
        status: ReservationStatus,
        at: Option<Ms>,
        reason: Option<String>,
    },
    PaymentRecorded {
        id: ReservationId,
        unit_id: UnitId,
        payment_status: PaymentStatus,
    },
}

impl Event {
    pub fn unit_id(&self) -> UnitId {
        match self {
            Event::UnitRegistered { id, .. } => *id,
            Event::ReservationInserted { reservation } => reservation.unit_id,
            Event::IntervalUpdated { unit_id, .. }
            | Event::StatusChanged { unit_id, .. }
            | Event::PaymentRecorded { unit_id, .. } => *unit_id,
        }
    }
}
