//! Appointment availability engine.
//!
//! Given a salon's weekly hours, ad-hoc closures, capacity and the day's
//! existing appointments, decides which slot starts can take a new
//! appointment of a given length, and whether one specific slot can.
//!
//! Each call reads one [`DaySchedule`] snapshot through the provider traits in
//! [`source`] and then evaluates it without further I/O. The answer is a
//! point-in-time estimate, not a reservation: two callers can both see a free
//! slot. Whoever writes the appointment must re-run [`DaySchedule::check_slot`]
//! against current state inside the same critical section as the write and
//! reject it if the re-check fails. `store::Store` does this under the
//! salon's write lock.

mod availability;
mod conflict;
mod error;
pub mod schedule;
pub mod snapshot;
pub mod source;
#[cfg(test)]
mod tests;

pub use availability::{validate_duration, validate_exclusions};
pub use conflict::{exceeds_capacity, peak_concurrency};
pub use error::{EngineError, SourceError};
pub use schedule::{closure_status, day_window, local_instant, parse_time_zone};
pub use snapshot::DaySchedule;
pub use source::{
    AppointmentProvider, BusinessHoursProvider, CapacityProvider, ClosureProvider, ScheduleSource,
};

use std::sync::Arc;

use chrono_tz::Tz;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::time::{parse_date, time_to_minutes, DEFAULT_SLOT_STEP_MINUTES};

/// Inputs for listing a day's slots.
#[derive(Debug, Clone)]
pub struct SlotQuery<'a> {
    pub salon_id: Ulid,
    /// Salon-local `"YYYY-MM-DD"`.
    pub date: &'a str,
    pub duration_minutes: i64,
    pub time_zone: Tz,
    /// Current instant; slots starting before it are reported as past.
    pub now: Option<Ms>,
}

/// Inputs for checking a single slot.
#[derive(Debug, Clone)]
pub struct SlotCheckQuery<'a> {
    pub salon_id: Ulid,
    pub date: &'a str,
    /// Salon-local `"HH:MM"`.
    pub time: &'a str,
    pub duration_minutes: i64,
    pub time_zone: Tz,
    /// Appointments to ignore, used when moving an appointment.
    pub exclude_ids: &'a [Ulid],
    pub now: Option<Ms>,
}

pub struct Engine<S: ?Sized> {
    source: Arc<S>,
    slot_step: u32,
}

impl<S: ?Sized> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            slot_step: self.slot_step,
        }
    }
}

impl<S: ScheduleSource + ?Sized> Engine<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            slot_step: DEFAULT_SLOT_STEP_MINUTES,
        }
    }

    pub fn with_slot_step(mut self, minutes: u32) -> Result<Self, EngineError> {
        if minutes == 0 {
            return Err(EngineError::Validation(
                "slot step must be at least one minute".into(),
            ));
        }
        self.slot_step = minutes;
        Ok(self)
    }

    pub fn slot_step(&self) -> u32 {
        self.slot_step
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Every slot start within business hours on `date`, each marked available
    /// or not with a reason. Closed days (ad-hoc closure, closed weekday, or
    /// no hours on record) give an empty list.
    pub async fn available_time_slots(&self, q: &SlotQuery<'_>) -> Result<Vec<TimeSlot>, EngineError> {
        let duration = validate_duration(q.duration_minutes)?;
        let date = parse_date(q.date)?;
        let source = self.source.as_ref();

        let closure = schedule::is_closed_on_date(source, q.salon_id, date).await?;
        if closure.closed {
            debug!(salon_id = %q.salon_id, %date, "closed by closure");
            return Ok(Vec::new());
        }
        let Some(hours) = schedule::open_hours_on(source, q.salon_id, date).await? else {
            debug!(salon_id = %q.salon_id, %date, "no business hours");
            return Ok(Vec::new());
        };

        let capacity = source.capacity(q.salon_id).await?;
        let appointments = snapshot::load_appointments(source, q.salon_id, date, &q.time_zone).await?;
        let day = DaySchedule {
            date,
            time_zone: q.time_zone,
            hours: Some(hours),
            closure,
            capacity,
            appointments,
        };

        let slots = day.list_slots(duration, self.slot_step, q.now);
        metrics::counter!(crate::observability::SLOTS_EVALUATED_TOTAL).increment(slots.len() as u64);
        debug!(
            salon_id = %q.salon_id,
            %date,
            duration,
            booked = day.appointments.len(),
            slots = slots.len(),
            "listed slots"
        );
        Ok(slots)
    }

    /// Decide one slot and report `used/total` capacity for it.
    pub async fn check_time_slot(&self, q: &SlotCheckQuery<'_>) -> Result<SlotCheck, EngineError> {
        let duration = validate_duration(q.duration_minutes)?;
        let date = parse_date(q.date)?;
        let start = time_to_minutes(q.time)?;
        validate_exclusions(q.exclude_ids)?;

        let day = snapshot::load_day(self.source.as_ref(), q.salon_id, date, q.time_zone).await?;
        let check = day.check_slot(start, duration, q.exclude_ids, q.now);
        metrics::counter!(crate::observability::SLOTS_EVALUATED_TOTAL).increment(1);
        debug!(
            salon_id = %q.salon_id,
            %date,
            time = q.time,
            duration,
            available = check.available,
            used = check.capacity_info.used,
            "checked slot"
        );
        Ok(check)
    }
}
