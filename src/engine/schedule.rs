use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::model::*;

use super::source::{BusinessHoursProvider, ClosureProvider};
use super::SourceError;

// ── Zone handling ─────────────────────────────────────────────────

/// Parse an IANA zone name.
pub fn parse_time_zone(name: &str) -> Result<Tz, SourceError> {
    name.parse::<Tz>()
        .map_err(|_| SourceError::InvalidTimeZone(name.to_string()))
}

/// Instant of salon-local wall-clock `minutes` after midnight on `date`.
/// `minutes` may be 1440 (next midnight).
///
/// Ambiguous local times take the earlier instant; local times inside a
/// spring-forward gap move to the first instant after the gap.
pub fn local_instant(tz: &Tz, date: NaiveDate, minutes: u32) -> Ms {
    let naive = date.and_time(NaiveTime::MIN) + TimeDelta::minutes(i64::from(minutes));
    resolve_local(tz, naive)
}

fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Ms {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        LocalResult::None => {
            // No zone has a gap longer than a few hours.
            let mut candidate = naive;
            for _ in 0..(4 * 60) {
                candidate += TimeDelta::minutes(1);
                if let Some(t) = tz.from_local_datetime(&candidate).earliest() {
                    return t.timestamp_millis();
                }
            }
            naive.and_utc().timestamp_millis()
        }
    }
}

/// `[local midnight, next local midnight)` for a salon-local date.
pub fn day_window(tz: &Tz, date: NaiveDate) -> Span {
    Span::new(
        local_instant(tz, date, 0),
        local_instant(tz, date, crate::time::MINUTES_PER_DAY),
    )
}

/// Calendar date of an instant as seen in the salon's zone.
pub fn local_date(tz: &Tz, instant: Ms) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(instant).map(|dt| dt.with_timezone(tz).date_naive())
}

/// Weekday of an instant, taken after converting into the salon's zone, never
/// the server's.
pub fn weekday_in_zone(tz: &Tz, instant: Ms) -> Option<Weekday> {
    local_date(tz, instant).map(Weekday::of)
}

/// Local wall-clock minutes since midnight for an instant.
pub fn local_minutes(tz: &Tz, instant: Ms) -> Option<u32> {
    use chrono::Timelike;
    DateTime::from_timestamp_millis(instant).map(|dt| {
        let local = dt.with_timezone(tz);
        local.hour() * 60 + local.minute()
    })
}

// ── Lookups ───────────────────────────────────────────────────────

/// First closure covering `date`, if any.
pub fn closure_status(closures: &[SalonClosure], date: NaiveDate) -> ClosureStatus {
    closures
        .iter()
        .find(|c| c.covers(date))
        .map_or_else(ClosureStatus::open, |c| ClosureStatus::closed(c.reason.clone()))
}

pub async fn is_closed_on_date<S: ClosureProvider + ?Sized>(
    source: &S,
    salon_id: Ulid,
    date: NaiveDate,
) -> Result<ClosureStatus, SourceError> {
    source.closure_on(salon_id, date).await
}

/// Hours for the weekday of `date`, only when the salon actually opens that day.
/// A missing record and an `is_closed` record both come back as `None`.
pub async fn open_hours_on<S: BusinessHoursProvider + ?Sized>(
    source: &S,
    salon_id: Ulid,
    date: NaiveDate,
) -> Result<Option<BusinessHours>, SourceError> {
    let hours = source.business_hours(salon_id, Weekday::of(date)).await?;
    Ok(hours.filter(|h| h.open_window().is_some()))
}
