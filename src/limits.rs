use crate::model::{DAY_MS, Ms};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single reservation accepted.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;
/// Widest window for listing and slot enumeration.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;
pub const MAX_SLOT_HOURS: u32 = 24 * 366;
pub const MAX_UPCOMING_DAYS: u32 = 90;

pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_NAME_LEN: usize = 256;
