use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::time::minutes_to_time;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

pub const MS_PER_MINUTE: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Back-to-back spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Weekday ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    /// Weekday of a calendar date. The date must already be salon-local.
    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }

    /// Position in a Monday-first week table.
    pub fn index(self) -> usize {
        match self {
            Weekday::Monday => 0,
            Weekday::Tuesday => 1,
            Weekday::Wednesday => 2,
            Weekday::Thursday => 3,
            Weekday::Friday => 4,
            Weekday::Saturday => 5,
            Weekday::Sunday => 6,
        }
    }

    /// Accepts full English names or three-letter abbreviations, any case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" | "mon" => Some(Weekday::Monday),
            "tuesday" | "tue" => Some(Weekday::Tuesday),
            "wednesday" | "wed" => Some(Weekday::Wednesday),
            "thursday" | "thu" => Some(Weekday::Thursday),
            "friday" | "fri" => Some(Weekday::Friday),
            "saturday" | "sat" => Some(Weekday::Saturday),
            "sunday" | "sun" => Some(Weekday::Sunday),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Capacity ─────────────────────────────────────────────────────

/// Max concurrent appointments for a salon. Always >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capacity(u32);

impl Capacity {
    pub const MIN: Capacity = Capacity(1);

    /// Boundary constructor: non-positive settings are floored to 1.
    pub fn new(raw: i64) -> Self {
        if raw < 1 {
            tracing::warn!("capacity {raw} is not positive, using 1");
            return Self::MIN;
        }
        Self(u32::try_from(raw).unwrap_or(u32::MAX))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Self::MIN
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Schedule records ─────────────────────────────────────────────

/// Weekly opening hours for one weekday, in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub weekday: Weekday,
    pub open: u32,
    pub close: u32,
    pub is_closed: bool,
}

impl BusinessHours {
    /// `(open, close)` when the salon actually opens on this weekday.
    pub fn open_window(&self) -> Option<(u32, u32)> {
        (!self.is_closed && self.open < self.close).then_some((self.open, self.close))
    }

    pub fn open_time(&self) -> String {
        minutes_to_time(self.open)
    }

    pub fn close_time(&self) -> String {
        minutes_to_time(self.close)
    }
}

/// Ad-hoc closure over an inclusive range of salon-local dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalonClosure {
    pub id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
}

impl SalonClosure {
    /// Calendar-day comparison, so a closure ending on `date` still covers all of it.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureStatus {
    pub closed: bool,
    pub reason: Option<String>,
}

impl ClosureStatus {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn closed(reason: Option<String>) -> Self {
        Self { closed: true, reason }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Booked,
    Completed,
    Canceled,
}

impl AppointmentStatus {
    /// Canceled appointments free their capacity.
    pub fn holds_capacity(self) -> bool {
        matches!(self, AppointmentStatus::Booked | AppointmentStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Booked => "BOOKED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Canceled => "CANCELED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
}

/// An existing appointment reduced to what the capacity check needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedInterval {
    pub id: Ulid,
    pub span: Span,
}

// ── Engine output ────────────────────────────────────────────────

/// Why a slot can't take a new appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    AfterHours,
    BeforeOpening,
    AlreadyBooked,
    CapacityExceeded,
    InPast,
    Closed { reason: Option<String> },
    NoBusinessHours,
}

impl UnavailableReason {
    /// Full-capacity reason, worded for single-chair salons.
    pub fn full(capacity: Capacity) -> Self {
        if capacity.get() == 1 {
            UnavailableReason::AlreadyBooked
        } else {
            UnavailableReason::CapacityExceeded
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::AfterHours => {
                write!(f, "Appointment would end after business hours")
            }
            UnavailableReason::BeforeOpening => {
                write!(f, "Appointment would start before business hours")
            }
            UnavailableReason::AlreadyBooked => write!(f, "Time slot already booked"),
            UnavailableReason::CapacityExceeded => {
                write!(f, "Time slot not available (capacity exceeded)")
            }
            UnavailableReason::InPast => write!(f, "Time slot is in the past"),
            UnavailableReason::Closed { reason: Some(r) } => write!(f, "Salon is closed: {r}"),
            UnavailableReason::Closed { reason: None } => write!(f, "Salon is closed on this date"),
            UnavailableReason::NoBusinessHours => write!(f, "Salon is closed on this day"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub time: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TimeSlot {
    pub fn available(time: String) -> Self {
        Self { time, available: true, reason: None }
    }

    pub fn unavailable(time: String, reason: &UnavailableReason) -> Self {
        Self {
            time,
            available: false,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityInfo {
    pub used: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotCheck {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub capacity_info: CapacityInfo,
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SalonCreated {
        id: Ulid,
        name: Option<String>,
        time_zone: String,
        capacity: Capacity,
    },
    SalonUpdated {
        id: Ulid,
        name: Option<String>,
        time_zone: String,
        capacity: Capacity,
    },
    BusinessHoursSet {
        salon_id: Ulid,
        hours: BusinessHours,
    },
    ClosureAdded {
        salon_id: Ulid,
        closure: SalonClosure,
    },
    ClosureRemoved {
        id: Ulid,
        salon_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        salon_id: Ulid,
        span: Span,
    },
    AppointmentRescheduled {
        id: Ulid,
        salon_id: Ulid,
        span: Span,
    },
    AppointmentStatusChanged {
        id: Ulid,
        salon_id: Ulid,
        status: AppointmentStatus,
    },
}

impl Event {
    pub fn salon_id(&self) -> Ulid {
        match self {
            Event::SalonCreated { id, .. } | Event::SalonUpdated { id, .. } => *id,
            Event::BusinessHoursSet { salon_id, .. }
            | Event::ClosureAdded { salon_id, .. }
            | Event::ClosureRemoved { salon_id, .. }
            | Event::AppointmentBooked { salon_id, .. }
            | Event::AppointmentRescheduled { salon_id, .. }
            | Event::AppointmentStatusChanged { salon_id, .. } => *salon_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalonInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub time_zone: chrono_tz::Tz,
    pub capacity: Capacity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(a.contains_instant(100));
        assert!(!a.contains_instant(200));
    }

    #[test]
    fn weekday_from_date() {
        // 2025-03-10 was a Monday, 2025-03-16 a Sunday
        let monday = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2025, 3, 16).unwrap();
        assert_eq!(Weekday::of(monday), Weekday::Monday);
        assert_eq!(Weekday::of(sunday), Weekday::Sunday);
        assert_eq!(Weekday::Sunday.index(), 6);
    }

    #[test]
    fn weekday_parse() {
        assert_eq!(Weekday::parse("Tuesday"), Some(Weekday::Tuesday));
        assert_eq!(Weekday::parse("sat"), Some(Weekday::Saturday));
        assert_eq!(Weekday::parse("0"), None);
        for day in Weekday::ALL {
            assert_eq!(Weekday::parse(day.as_str()), Some(day));
        }
    }

    #[test]
    fn capacity_floors_at_one() {
        assert_eq!(Capacity::new(0).get(), 1);
        assert_eq!(Capacity::new(-3).get(), 1);
        assert_eq!(Capacity::new(4).get(), 4);
        assert_eq!(Capacity::default().get(), 1);
    }

    #[test]
    fn closed_hours_have_no_window() {
        let hours = BusinessHours {
            weekday: Weekday::Monday,
            open: 540,
            close: 1020,
            is_closed: true,
        };
        assert_eq!(hours.open_window(), None);
        let open = BusinessHours { is_closed: false, ..hours };
        assert_eq!(open.open_window(), Some((540, 1020)));
        assert_eq!(open.open_time(), "09:00");
        assert_eq!(open.close_time(), "17:00");
    }

    #[test]
    fn closure_covers_inclusive_range() {
        let closure = SalonClosure {
            id: Ulid::new(),
            start_date: NaiveDate::from_ymd_opt(2025, 12, 24).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 26).unwrap(),
            reason: None,
        };
        assert!(closure.covers(NaiveDate::from_ymd_opt(2025, 12, 24).unwrap()));
        assert!(closure.covers(NaiveDate::from_ymd_opt(2025, 12, 26).unwrap()));
        assert!(!closure.covers(NaiveDate::from_ymd_opt(2025, 12, 27).unwrap()));
    }

    #[test]
    fn reason_wording() {
        assert_eq!(
            UnavailableReason::full(Capacity::new(1)).to_string(),
            "Time slot already booked"
        );
        assert_eq!(
            UnavailableReason::full(Capacity::new(2)).to_string(),
            "Time slot not available (capacity exceeded)"
        );
        assert_eq!(
            UnavailableReason::Closed { reason: Some("Holiday".into()) }.to_string(),
            "Salon is closed: Holiday"
        );
    }

    #[test]
    fn time_slot_json_shape() {
        let free = serde_json::to_value(TimeSlot::available("09:00".into())).unwrap();
        assert_eq!(free, serde_json::json!({ "time": "09:00", "available": true }));

        let check = SlotCheck {
            available: false,
            reason: Some(UnavailableReason::CapacityExceeded.to_string()),
            capacity_info: CapacityInfo { used: 2, total: 2 },
        };
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["capacityInfo"]["used"], 2);
        assert_eq!(json["capacityInfo"]["total"], 2);
        assert_eq!(json["reason"], "Time slot not available (capacity exceeded)");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ClosureAdded {
            salon_id: Ulid::new(),
            closure: SalonClosure {
                id: Ulid::new(),
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
                reason: Some("New year".into()),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
