use crate::model::*;

// ── Slot enumeration ─────────────────────────────────────────────

/// Fixed-length free slots inside `range`, packed back-to-back into each gap
/// between `booked` spans.
///
/// `booked` must be sorted by start; the scan carries a single cursor and
/// never looks back. Spans reaching outside `range` are fine.
pub fn free_slots(range: Span, slot_ms: Ms, booked: &[Span]) -> Vec<Span> {
    let mut slots = Vec::new();
    if slot_ms <= 0 {
        return slots;
    }
    let mut cursor = range.start;
    for b in booked {
        fill_gap(&mut slots, cursor, b.start.min(range.end), slot_ms);
        cursor = cursor.max(b.end);
    }
    fill_gap(&mut slots, cursor, range.end, slot_ms);
    slots
}

fn fill_gap(out: &mut Vec<Span>, mut from: Ms, until: Ms, slot_ms: Ms) {
    while from + slot_ms <= until {
        out.push(Span::new(from, from + slot_ms));
        from += slot_ms;
    }
}
