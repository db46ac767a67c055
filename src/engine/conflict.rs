use ulid::Ulid;

use crate::model::*;

// ── Capacity sweep ────────────────────────────────────────────────

/// Existing intervals that overlap `window`, minus the excluded ids.
fn overlapping<'a>(
    window: Span,
    existing: &'a [BookedInterval],
    exclude: &'a [Ulid],
) -> impl Iterator<Item = &'a BookedInterval> {
    existing
        .iter()
        .filter(move |i| i.span.overlaps(&window) && !exclude.contains(&i.id))
}

/// Sort sweep events by time; at equal times `-1` (end) sorts before `+1`
/// (start), so an appointment ending at T frees its seat before one starting
/// at T takes it.
fn sort_events<T>(events: &mut [(Ms, i32, T)]) {
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
}

/// Sweep-line: would admitting `proposed` push the number of concurrent
/// appointments above `capacity` at any instant while `proposed` is active?
pub fn exceeds_capacity(
    proposed: Span,
    existing: &[BookedInterval],
    capacity: Capacity,
    exclude: &[Ulid],
) -> bool {
    // (time, delta, is_proposed)
    let mut events: Vec<(Ms, i32, bool)> = Vec::with_capacity(existing.len() * 2 + 2);
    for interval in overlapping(proposed, existing, exclude) {
        events.push((interval.span.start, 1, false));
        events.push((interval.span.end, -1, false));
    }
    events.push((proposed.start, 1, true));
    events.push((proposed.end, -1, true));
    sort_events(&mut events);

    let capacity = i64::from(capacity.get());
    let mut active: i64 = 0;
    let mut proposed_active = false;

    for (_, delta, is_proposed) in events {
        active += i64::from(delta);
        if is_proposed {
            proposed_active = delta > 0;
        }
        if proposed_active && active > capacity {
            return true;
        }
    }
    false
}

/// Highest number of existing appointments simultaneously active at any
/// instant inside `window`. A proposal over `window` fits iff this is below
/// capacity.
pub fn peak_concurrency(window: Span, existing: &[BookedInterval], exclude: &[Ulid]) -> u32 {
    let mut events: Vec<(Ms, i32, ())> = Vec::new();
    for interval in overlapping(window, existing, exclude) {
        events.push((interval.span.start.max(window.start), 1, ()));
        events.push((interval.span.end.min(window.end), -1, ()));
    }
    sort_events(&mut events);

    let mut active: u32 = 0;
    let mut peak: u32 = 0;
    for (_, delta, ()) in events {
        if delta > 0 {
            active += 1;
            peak = peak.max(active);
        } else {
            active = active.saturating_sub(1);
        }
    }
    peak
}
