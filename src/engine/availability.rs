use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::time::{minutes_to_time, slot_starts};

use super::conflict::{exceeds_capacity, peak_concurrency};
use super::schedule::local_instant;
use super::snapshot::DaySchedule;
use super::EngineError;

// ── Input validation ──────────────────────────────────────────────

pub fn validate_duration(minutes: i64) -> Result<u32, EngineError> {
    if minutes <= 0 {
        return Err(EngineError::Validation(format!(
            "duration must be positive, got {minutes}"
        )));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::Validation(format!(
            "duration {minutes} exceeds {MAX_DURATION_MINUTES} minutes"
        )));
    }
    // bounded by MAX_DURATION_MINUTES above
    Ok(minutes as u32)
}

pub fn validate_exclusions(ids: &[Ulid]) -> Result<(), EngineError> {
    if ids.len() > MAX_EXCLUDE_IDS {
        return Err(EngineError::Validation(format!(
            "at most {MAX_EXCLUDE_IDS} excluded appointments"
        )));
    }
    Ok(())
}

// ── Slot evaluation over a snapshot ───────────────────────────────

impl DaySchedule {
    /// `(open, close)` minutes, or `None` if the salon doesn't open on this date.
    pub fn open_window(&self) -> Option<(u32, u32)> {
        if self.closure.closed {
            return None;
        }
        self.hours.and_then(|h| h.open_window())
    }

    /// The absolute interval a new appointment at local `start` would occupy.
    pub fn proposed_span(&self, start: u32, duration: u32) -> Span {
        let begin = local_instant(&self.time_zone, self.date, start);
        Span::new(begin, begin + Ms::from(duration) * MS_PER_MINUTE)
    }

    /// Every candidate start across business hours, each marked available or not.
    /// Empty when the salon is closed on this date.
    pub fn list_slots(&self, duration: u32, step: u32, now: Option<Ms>) -> Vec<TimeSlot> {
        let Some((open, close)) = self.open_window() else {
            return Vec::new();
        };
        slot_starts(open, close, step)
            .map(|start| {
                let time = minutes_to_time(start);
                match self.slot_conflict(start, close, duration, now) {
                    None => TimeSlot::available(time),
                    Some(reason) => TimeSlot::unavailable(time, &reason),
                }
            })
            .collect()
    }

    fn slot_conflict(
        &self,
        start: u32,
        close: u32,
        duration: u32,
        now: Option<Ms>,
    ) -> Option<UnavailableReason> {
        if start + duration > close {
            return Some(UnavailableReason::AfterHours);
        }
        let proposed = self.proposed_span(start, duration);
        if now.is_some_and(|now| proposed.start < now) {
            return Some(UnavailableReason::InPast);
        }
        if exceeds_capacity(proposed, &self.appointments, self.capacity, &[]) {
            return Some(UnavailableReason::full(self.capacity));
        }
        None
    }

    /// Decide one specific slot. `exclude` drops appointments (by id) from the
    /// count, so an appointment being moved never collides with itself.
    pub fn check_slot(&self, start: u32, duration: u32, exclude: &[Ulid], now: Option<Ms>) -> SlotCheck {
        let proposed = self.proposed_span(start, duration);
        let used = peak_concurrency(proposed, &self.appointments, exclude);
        let capacity_info = CapacityInfo {
            used,
            total: self.capacity.get(),
        };

        let reason = if self.closure.closed {
            Some(UnavailableReason::Closed {
                reason: self.closure.reason.clone(),
            })
        } else {
            match self.hours.and_then(|h| h.open_window()) {
                None => Some(UnavailableReason::NoBusinessHours),
                Some((open, _)) if start < open => Some(UnavailableReason::BeforeOpening),
                Some((_, close)) if start + duration > close => Some(UnavailableReason::AfterHours),
                Some(_) if now.is_some_and(|now| proposed.start < now) => {
                    Some(UnavailableReason::InPast)
                }
                Some(_) if used >= self.capacity.get() => {
                    Some(UnavailableReason::full(self.capacity))
                }
                Some(_) => None,
            }
        };

        SlotCheck {
            available: reason.is_none(),
            reason: reason.map(|r| r.to_string()),
            capacity_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use chrono_tz::Tz;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    /// A UTC salon open 09:00–17:00, so local minutes map straight to ms.
    fn day(capacity: i64, appointments: Vec<BookedInterval>) -> DaySchedule {
        DaySchedule {
            date: monday(),
            time_zone: Tz::UTC,
            hours: Some(BusinessHours {
                weekday: Weekday::Monday,
                open: 9 * 60,
                close: 17 * 60,
                is_closed: false,
            }),
            closure: ClosureStatus::open(),
            capacity: Capacity::new(capacity),
            appointments,
        }
    }

    fn midnight() -> Ms {
        local_instant(&Tz::UTC, monday(), 0)
    }

    fn appt(start: Ms, end: Ms) -> BookedInterval {
        BookedInterval {
            id: Ulid::new(),
            span: Span::new(midnight() + start, midnight() + end),
        }
    }

    #[test]
    fn empty_day_all_slots_open_until_close() {
        let slots = day(2, vec![]).list_slots(30, 30, None);
        assert_eq!(slots.len(), 16);
        assert_eq!(slots[0].time, "09:00");
        assert_eq!(slots[15].time, "16:30");
        assert!(slots.iter().all(|s| s.available && s.reason.is_none()));
    }

    #[test]
    fn slot_ending_past_close_rejected() {
        let slots = day(2, vec![]).list_slots(60, 30, None);
        let last = slots.last().unwrap();
        assert_eq!(last.time, "16:30");
        assert!(!last.available);
        assert_eq!(last.reason.as_deref(), Some("Appointment would end after business hours"));
        let four = slots.iter().find(|s| s.time == "16:00").unwrap();
        assert!(four.available);
    }

    #[test]
    fn capacity_reason_depends_on_chair_count() {
        let booked = vec![appt(10 * H, 11 * H)];
        let single = day(1, booked.clone()).list_slots(30, 30, None);
        let ten = single.iter().find(|s| s.time == "10:00").unwrap();
        assert_eq!(ten.reason.as_deref(), Some("Time slot already booked"));

        let double = day(2, vec![booked[0], appt(10 * H, 11 * H)]).list_slots(30, 30, None);
        let ten = double.iter().find(|s| s.time == "10:00").unwrap();
        assert_eq!(ten.reason.as_deref(), Some("Time slot not available (capacity exceeded)"));
    }

    #[test]
    fn past_slots_marked() {
        let now = midnight() + 12 * H + 10 * M;
        let slots = day(1, vec![]).list_slots(30, 30, Some(now));
        let noon = slots.iter().find(|s| s.time == "12:00").unwrap();
        assert_eq!(noon.reason.as_deref(), Some("Time slot is in the past"));
        let half = slots.iter().find(|s| s.time == "12:30").unwrap();
        assert!(half.available);
    }

    #[test]
    fn closed_day_lists_nothing() {
        let mut d = day(1, vec![]);
        d.closure = ClosureStatus::closed(Some("Inventory".into()));
        assert!(d.list_slots(30, 30, None).is_empty());

        let mut d = day(1, vec![]);
        d.hours = None;
        assert!(d.list_slots(30, 30, None).is_empty());
    }

    #[test]
    fn check_slot_reports_capacity_info() {
        let d = day(2, vec![appt(10 * H, 11 * H), appt(10 * H + 30 * M, 11 * H + 30 * M)]);
        let full = d.check_slot(10 * 60 + 15, 60, &[], None);
        assert!(!full.available);
        assert_eq!(full.capacity_info, CapacityInfo { used: 2, total: 2 });

        let free = d.check_slot(12 * 60, 60, &[], None);
        assert!(free.available);
        assert_eq!(free.reason, None);
        assert_eq!(free.capacity_info, CapacityInfo { used: 0, total: 2 });
    }

    #[test]
    fn check_slot_outside_hours() {
        let d = day(1, vec![]);
        assert_eq!(
            d.check_slot(8 * 60 + 30, 30, &[], None).reason.as_deref(),
            Some("Appointment would start before business hours")
        );
        assert_eq!(
            d.check_slot(16 * 60 + 45, 30, &[], None).reason.as_deref(),
            Some("Appointment would end after business hours")
        );
        assert!(d.check_slot(16 * 60 + 30, 30, &[], None).available);
    }

    #[test]
    fn check_slot_on_closed_days() {
        let mut d = day(1, vec![]);
        d.closure = ClosureStatus::closed(Some("Holiday".into()));
        let check = d.check_slot(10 * 60, 30, &[], None);
        assert!(!check.available);
        assert_eq!(check.reason.as_deref(), Some("Salon is closed: Holiday"));

        let mut d = day(1, vec![]);
        d.hours = None;
        assert_eq!(
            d.check_slot(10 * 60, 30, &[], None).reason.as_deref(),
            Some("Salon is closed on this day")
        );
    }

    #[test]
    fn own_appointment_excluded_on_reschedule() {
        let own = appt(14 * H, 15 * H);
        let d = day(1, vec![own]);
        assert!(!d.check_slot(14 * 60, 60, &[], None).available);
        let moved = d.check_slot(14 * 60, 60, &[own.id], None);
        assert!(moved.available);
        assert_eq!(moved.capacity_info.used, 0);
    }

    #[test]
    fn duration_validation() {
        assert!(validate_duration(0).is_err());
        assert!(validate_duration(-30).is_err());
        assert!(validate_duration(MAX_DURATION_MINUTES + 1).is_err());
        assert_eq!(validate_duration(45), Ok(45));
    }
}
