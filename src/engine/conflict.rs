use crate::limits::*;
use crate::model::*;

use super::BookingError;

/// The sole overlap predicate: `[a_start, a_end)` and `[b_start, b_end)` share
/// an instant iff `a_start < b_end && a_end > b_start`.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && a_end > b_start
}

pub(crate) fn validate_span(span: &Span) -> Result<(), BookingError> {
    if span.end <= span.start {
        return Err(BookingError::InvalidArgument(format!(
            "end must be after start, got [{}, {})",
            span.start, span.end
        )));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::InvalidArgument("timestamp out of range".into()));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(BookingError::InvalidArgument("interval too wide".into()));
    }
    Ok(())
}

pub(crate) fn validate_query_window(range: &Span) -> Result<(), BookingError> {
    validate_span(range)?;
    if range.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(BookingError::InvalidArgument("query window too wide".into()));
    }
    Ok(())
}

pub(crate) fn validate_charges(duration_hours: u32, total_price: u64) -> Result<(), BookingError> {
    if duration_hours == 0 {
        return Err(BookingError::InvalidArgument("duration_hours must be > 0".into()));
    }
    if total_price == 0 {
        return Err(BookingError::InvalidArgument("total_price must be > 0".into()));
    }
    Ok(())
}
