use chrono::NaiveDate;
use chrono_tz::Tz;
use ulid::Ulid;

use crate::model::*;

use super::schedule::{self, day_window};
use super::source::{AppointmentProvider, ScheduleSource};
use super::SourceError;

/// Everything one availability computation reads, taken once and then
/// treated as immutable.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub time_zone: Tz,
    /// Weekly hours for this weekday; `None` when missing or marked closed.
    pub hours: Option<BusinessHours>,
    pub closure: ClosureStatus,
    pub capacity: Capacity,
    /// Capacity-holding appointments starting on this salon-local day.
    pub appointments: Vec<BookedInterval>,
}

/// Capacity-holding appointments starting within the salon-local day.
pub async fn load_appointments<S: AppointmentProvider + ?Sized>(
    source: &S,
    salon_id: Ulid,
    date: NaiveDate,
    tz: &Tz,
) -> Result<Vec<BookedInterval>, SourceError> {
    source
        .appointments_starting_in(salon_id, day_window(tz, date))
        .await
}

/// Read the full day snapshot for a salon.
pub async fn load_day<S: ScheduleSource + ?Sized>(
    source: &S,
    salon_id: Ulid,
    date: NaiveDate,
    tz: Tz,
) -> Result<DaySchedule, SourceError> {
    let closure = schedule::is_closed_on_date(source, salon_id, date).await?;
    let hours = schedule::open_hours_on(source, salon_id, date).await?;
    let capacity = source.capacity(salon_id).await?;
    let appointments = load_appointments(source, salon_id, date, &tz).await?;
    Ok(DaySchedule {
        date,
        time_zone: tz,
        hours,
        closure,
        capacity,
        appointments,
    })
}
