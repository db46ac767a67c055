use super::*;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use std::path::PathBuf;

use crate::limits::*;
use crate::store::{BookingRequest, Store};

const MONDAY: &str = "2025-03-10";

fn utc_ms(rfc3339: &str) -> Ms {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().timestamp_millis()
}

fn open_all_week(open: u32, close: u32) -> Vec<BusinessHours> {
    Weekday::ALL
        .into_iter()
        .map(|weekday| BusinessHours {
            weekday,
            open,
            close,
            is_closed: false,
        })
        .collect()
}

/// In-memory collaborators for one salon.
struct FakeSource {
    salon: Ulid,
    hours: Vec<BusinessHours>,
    closures: Vec<SalonClosure>,
    appointments: Vec<BookedInterval>,
    capacity: Capacity,
    /// Fail appointment lookups with a backend error.
    appointments_down: bool,
}

impl FakeSource {
    fn new(capacity: i64) -> Self {
        Self {
            salon: Ulid::new(),
            hours: open_all_week(9 * 60, 17 * 60),
            closures: Vec::new(),
            appointments: Vec::new(),
            capacity: Capacity::new(capacity),
            appointments_down: false,
        }
    }

    fn check(&self, salon_id: Ulid) -> Result<(), SourceError> {
        if salon_id == self.salon {
            Ok(())
        } else {
            Err(SourceError::SalonNotFound(salon_id))
        }
    }

    /// Book at UTC wall-clock times on the test Monday.
    fn book(&mut self, start: &str, end: &str) -> Ulid {
        let id = Ulid::new();
        self.appointments.push(BookedInterval {
            id,
            span: Span::new(
                utc_ms(&format!("{MONDAY}T{start}:00Z")),
                utc_ms(&format!("{MONDAY}T{end}:00Z")),
            ),
        });
        id
    }
}

#[async_trait]
impl BusinessHoursProvider for FakeSource {
    async fn business_hours(
        &self,
        salon_id: Ulid,
        weekday: Weekday,
    ) -> Result<Option<BusinessHours>, SourceError> {
        self.check(salon_id)?;
        Ok(self.hours.iter().find(|h| h.weekday == weekday).copied())
    }
}

#[async_trait]
impl ClosureProvider for FakeSource {
    async fn closure_on(&self, salon_id: Ulid, date: NaiveDate) -> Result<ClosureStatus, SourceError> {
        self.check(salon_id)?;
        Ok(closure_status(&self.closures, date))
    }
}

#[async_trait]
impl AppointmentProvider for FakeSource {
    async fn appointments_starting_in(
        &self,
        salon_id: Ulid,
        window: Span,
    ) -> Result<Vec<BookedInterval>, SourceError> {
        self.check(salon_id)?;
        if self.appointments_down {
            return Err(SourceError::Backend("connection reset".into()));
        }
        Ok(self
            .appointments
            .iter()
            .filter(|a| window.contains_instant(a.span.start))
            .copied()
            .collect())
    }
}

#[async_trait]
impl CapacityProvider for FakeSource {
    async fn capacity(&self, salon_id: Ulid) -> Result<Capacity, SourceError> {
        self.check(salon_id)?;
        Ok(self.capacity)
    }
}

fn engine(source: FakeSource) -> (Engine<FakeSource>, Ulid) {
    let salon = source.salon;
    (Engine::new(Arc::new(source)), salon)
}

fn slots_query(salon_id: Ulid, date: &str, duration: i64) -> SlotQuery<'_> {
    SlotQuery {
        salon_id,
        date,
        duration_minutes: duration,
        time_zone: Tz::UTC,
        now: None,
    }
}

fn check_query<'a>(salon_id: Ulid, time: &'a str, duration: i64, exclude: &'a [Ulid]) -> SlotCheckQuery<'a> {
    SlotCheckQuery {
        salon_id,
        date: MONDAY,
        time,
        duration_minutes: duration,
        time_zone: Tz::UTC,
        exclude_ids: exclude,
        now: None,
    }
}

fn slot<'a>(slots: &'a [TimeSlot], time: &str) -> &'a TimeSlot {
    slots.iter().find(|s| s.time == time).unwrap()
}

// ── Listing slots ────────────────────────────────────────

#[tokio::test]
async fn empty_day_every_half_hour_open() {
    let (engine, salon) = engine(FakeSource::new(2));
    let slots = engine
        .available_time_slots(&slots_query(salon, MONDAY, 30))
        .await
        .unwrap();
    let times: Vec<&str> = slots.iter().map(|s| s.time.as_str()).collect();
    assert_eq!(times.len(), 16);
    assert_eq!(times.first(), Some(&"09:00"));
    assert_eq!(times.last(), Some(&"16:30"));
    // 16:30 + 30 min ends exactly at close.
    assert!(slots.iter().all(|s| s.available));
}

#[tokio::test]
async fn overlapping_pair_fills_two_chairs() {
    let mut source = FakeSource::new(2);
    source.book("10:00", "11:00");
    source.book("10:30", "11:30");
    let (engine, salon) = engine(source);

    let slots = engine
        .available_time_slots(&slots_query(salon, MONDAY, 30))
        .await
        .unwrap();
    assert!(slot(&slots, "10:00").available);
    let full = slot(&slots, "10:30");
    assert!(!full.available);
    assert_eq!(full.reason.as_deref(), Some("Time slot not available (capacity exceeded)"));
    assert!(slot(&slots, "11:00").available);
    assert!(slot(&slots, "11:30").available);

    let check = engine
        .check_time_slot(&check_query(salon, "10:15", 30, &[]))
        .await
        .unwrap();
    assert!(!check.available);
    assert_eq!(check.capacity_info, CapacityInfo { used: 2, total: 2 });
}

#[tokio::test]
async fn free_slot_reports_zero_used() {
    let mut source = FakeSource::new(2);
    source.book("10:00", "11:00");
    source.book("10:30", "11:30");
    let (engine, salon) = engine(source);

    let check = engine
        .check_time_slot(&check_query(salon, "12:00", 60, &[]))
        .await
        .unwrap();
    assert!(check.available);
    assert_eq!(check.reason, None);
    assert_eq!(check.capacity_info, CapacityInfo { used: 0, total: 2 });
}

#[tokio::test]
async fn closure_empties_the_day() {
    let mut source = FakeSource::new(2);
    source.closures.push(SalonClosure {
        id: Ulid::new(),
        start_date: NaiveDate::from_ymd_opt(2025, 3, 8).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
        reason: Some("Renovation".into()),
    });
    let (engine, salon) = engine(source);

    let slots = engine
        .available_time_slots(&slots_query(salon, MONDAY, 30))
        .await
        .unwrap();
    assert!(slots.is_empty());

    let check = engine
        .check_time_slot(&check_query(salon, "10:00", 30, &[]))
        .await
        .unwrap();
    assert!(!check.available);
    assert_eq!(check.reason.as_deref(), Some("Salon is closed: Renovation"));

    // The day after the closure ends is open again.
    let tuesday = engine
        .available_time_slots(&slots_query(salon, "2025-03-11", 30))
        .await
        .unwrap();
    assert_eq!(tuesday.len(), 16);
}

#[tokio::test]
async fn rescheduling_into_full_window_rejected() {
    let mut source = FakeSource::new(2);
    source.book("10:00", "11:00");
    source.book("10:30", "11:30");
    let c = source.book("11:00", "12:00");
    let (engine, salon) = engine(source);

    let exclude = [c];
    let check = engine
        .check_time_slot(&check_query(salon, "10:15", 60, &exclude))
        .await
        .unwrap();
    assert!(!check.available);
    assert_eq!(check.capacity_info.used, 2);
}

#[tokio::test]
async fn rescheduling_onto_itself_is_available() {
    let mut source = FakeSource::new(1);
    let c = source.book("11:00", "12:00");
    let (engine, salon) = engine(source);

    let blocked = engine
        .check_time_slot(&check_query(salon, "11:00", 60, &[]))
        .await
        .unwrap();
    assert!(!blocked.available);
    assert_eq!(blocked.reason.as_deref(), Some("Time slot already booked"));

    let own = [c];
    let moved = engine
        .check_time_slot(&check_query(salon, "11:00", 60, &own))
        .await
        .unwrap();
    assert!(moved.available);
    assert_eq!(moved.capacity_info, CapacityInfo { used: 0, total: 1 });
}

#[tokio::test]
async fn back_to_back_appointments_do_not_conflict() {
    let mut source = FakeSource::new(1);
    source.book("10:00", "11:00");
    let (engine, salon) = engine(source);

    let after = engine
        .check_time_slot(&check_query(salon, "11:00", 30, &[]))
        .await
        .unwrap();
    assert!(after.available);
    let before = engine
        .check_time_slot(&check_query(salon, "09:00", 60, &[]))
        .await
        .unwrap();
    assert!(before.available);
}

#[tokio::test]
async fn closed_weekday_and_missing_hours_look_the_same() {
    let mut source = FakeSource::new(1);
    source
        .hours
        .retain(|h| h.weekday != Weekday::Monday && h.weekday != Weekday::Sunday);
    source.hours.push(BusinessHours {
        weekday: Weekday::Sunday,
        open: 9 * 60,
        close: 17 * 60,
        is_closed: true,
    });
    let (engine, salon) = engine(source);

    for date in [MONDAY, "2025-03-09"] {
        let slots = engine
            .available_time_slots(&slots_query(salon, date, 30))
            .await
            .unwrap();
        assert!(slots.is_empty(), "{date} should be closed");
    }
    let check = engine
        .check_time_slot(&check_query(salon, "10:00", 30, &[]))
        .await
        .unwrap();
    assert_eq!(check.reason.as_deref(), Some("Salon is closed on this day"));
}

#[tokio::test]
async fn hours_boundaries_reported() {
    let (engine, salon) = engine(FakeSource::new(1));
    let early = engine
        .check_time_slot(&check_query(salon, "08:30", 30, &[]))
        .await
        .unwrap();
    assert_eq!(
        early.reason.as_deref(),
        Some("Appointment would start before business hours")
    );
    let late = engine
        .check_time_slot(&check_query(salon, "16:45", 30, &[]))
        .await
        .unwrap();
    assert_eq!(
        late.reason.as_deref(),
        Some("Appointment would end after business hours")
    );
    let exact = engine
        .check_time_slot(&check_query(salon, "16:30", 30, &[]))
        .await
        .unwrap();
    assert!(exact.available);
}

#[tokio::test]
async fn past_slots_marked_when_now_given() {
    let (engine, salon) = engine(FakeSource::new(1));
    let mut q = slots_query(salon, MONDAY, 30);
    q.now = Some(utc_ms("2025-03-10T12:10:00Z"));
    let slots = engine.available_time_slots(&q).await.unwrap();

    let twelve = slot(&slots, "12:00");
    assert!(!twelve.available);
    assert_eq!(twelve.reason.as_deref(), Some("Time slot is in the past"));
    assert!(slot(&slots, "12:30").available);
    assert_eq!(slots.iter().filter(|s| !s.available).count(), 7);

    // Without a clock the same day is fully open.
    let q = slots_query(salon, MONDAY, 30);
    assert!(engine.available_time_slots(&q).await.unwrap().iter().all(|s| s.available));
}

#[tokio::test]
async fn slot_step_is_configurable() {
    let (engine, salon) = engine(FakeSource::new(1));
    let engine = engine.with_slot_step(15).unwrap();
    assert_eq!(engine.slot_step(), 15);
    let slots = engine
        .available_time_slots(&slots_query(salon, MONDAY, 30))
        .await
        .unwrap();
    assert_eq!(slots.len(), 32);
    assert_eq!(slots[1].time, "09:15");

    assert!(matches!(
        engine.clone().with_slot_step(0),
        Err(EngineError::Validation(_))
    ));
}

// ── Zones ────────────────────────────────────────────────

#[tokio::test]
async fn weekday_comes_from_salon_date_not_utc() {
    // Only Monday is open; the salon-local date decides, whatever the UTC day.
    for tz in [chrono_tz::Asia::Tokyo, chrono_tz::America::Los_Angeles] {
        let mut source = FakeSource::new(1);
        source.hours.retain(|h| h.weekday == Weekday::Monday);
        let (engine, salon) = engine(source);
        let mut q = slots_query(salon, MONDAY, 30);
        q.time_zone = tz;
        let slots = engine.available_time_slots(&q).await.unwrap();
        assert_eq!(slots.len(), 16, "{tz}");

        let mut sunday = slots_query(salon, "2025-03-09", 30);
        sunday.time_zone = tz;
        assert!(engine.available_time_slots(&sunday).await.unwrap().is_empty(), "{tz}");
    }
}

#[tokio::test]
async fn appointments_resolved_in_salon_zone() {
    let tokyo = chrono_tz::Asia::Tokyo;
    let mut source = FakeSource::new(1);
    // 10:00–11:00 Tokyo on Monday.
    source.appointments.push(BookedInterval {
        id: Ulid::new(),
        span: Span::new(utc_ms("2025-03-10T01:00:00Z"), utc_ms("2025-03-10T02:00:00Z")),
    });
    // Sunday-evening Tokyo appointment; must not leak into Monday.
    source.appointments.push(BookedInterval {
        id: Ulid::new(),
        span: Span::new(utc_ms("2025-03-09T12:00:00Z"), utc_ms("2025-03-09T13:00:00Z")),
    });
    let (engine, salon) = engine(source);

    let mut q = check_query(salon, "10:30", 30, &[]);
    q.time_zone = tokyo;
    let check = engine.check_time_slot(&q).await.unwrap();
    assert!(!check.available);
    assert_eq!(check.capacity_info.used, 1);

    let mut q = slots_query(salon, MONDAY, 60);
    q.time_zone = tokyo;
    let slots = engine.available_time_slots(&q).await.unwrap();
    // 09:30, 10:00 and 10:30 overlap; 16:30 runs past close.
    assert_eq!(slots.iter().filter(|s| !s.available).count(), 4);
}

// ── Validation & errors ──────────────────────────────────

#[tokio::test]
async fn malformed_input_is_a_validation_error() {
    let (engine, salon) = engine(FakeSource::new(1));
    for duration in [0, -30, MAX_DURATION_MINUTES + 1] {
        let err = engine
            .available_time_slots(&slots_query(salon, MONDAY, duration))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "duration {duration}");
    }
    for date in ["2025-02-30", "10/03/2025", ""] {
        let err = engine
            .available_time_slots(&slots_query(salon, date, 30))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "date {date:?}");
    }
    for time in ["25:00", "9am", "09:60", "noon"] {
        let err = engine
            .check_time_slot(&check_query(salon, time, 30, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "time {time:?}");
    }
    let too_many: Vec<Ulid> = (0..=MAX_EXCLUDE_IDS).map(|_| Ulid::new()).collect();
    let err = engine
        .check_time_slot(&check_query(salon, "10:00", 30, &too_many))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn unknown_salon_propagates() {
    let (engine, _) = engine(FakeSource::new(1));
    let stranger = Ulid::new();
    let err = engine
        .available_time_slots(&slots_query(stranger, MONDAY, 30))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Source(SourceError::SalonNotFound(stranger)));
}

#[tokio::test]
async fn backend_failure_propagates_unchanged() {
    let mut source = FakeSource::new(1);
    source.appointments_down = true;
    let (engine, salon) = engine(source);
    let err = engine
        .check_time_slot(&check_query(salon, "10:00", 30, &[]))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Source(SourceError::Backend("connection reset".into()))
    );
}

// ── Engine over the store ────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("chairtime_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn store_salon(store: &Store, capacity: i64) -> Ulid {
    let id = Ulid::new();
    store
        .create_salon(id, None, "UTC", Capacity::new(capacity))
        .await
        .unwrap();
    for hours in open_all_week(9 * 60, 17 * 60) {
        store.set_business_hours(id, hours).await.unwrap();
    }
    id
}

fn booking<'a>(time: &'a str, duration: i64) -> BookingRequest<'a> {
    BookingRequest {
        date: MONDAY,
        time,
        duration_minutes: duration,
        now: None,
    }
}

#[tokio::test]
async fn store_bookings_show_up_in_availability() {
    let store = Arc::new(Store::open(test_wal_path("store_backed.wal")).unwrap());
    let salon = store_salon(&store, 2).await;
    let engine = Engine::new(store.clone());

    store
        .book_appointment(Ulid::new(), salon, &booking("10:00", 60))
        .await
        .unwrap();
    let b = store
        .book_appointment(Ulid::new(), salon, &booking("10:30", 60))
        .await
        .unwrap();

    let slots = engine
        .available_time_slots(&slots_query(salon, MONDAY, 30))
        .await
        .unwrap();
    assert!(!slot(&slots, "10:30").available);

    // Canceled appointments stop holding a chair.
    store.cancel_appointment(b.id).await.unwrap();
    let slots = engine
        .available_time_slots(&slots_query(salon, MONDAY, 30))
        .await
        .unwrap();
    assert!(slot(&slots, "10:30").available);

    let check = engine
        .check_time_slot(&check_query(salon, "10:15", 30, &[]))
        .await
        .unwrap();
    assert_eq!(check.capacity_info, CapacityInfo { used: 1, total: 2 });
}

#[tokio::test]
async fn check_matches_listing_for_every_slot() {
    let store = Arc::new(Store::open(test_wal_path("agreement.wal")).unwrap());
    let salon = store_salon(&store, 2).await;
    let engine = Engine::new(store.clone());
    for (time, duration) in [("09:00", 90), ("09:30", 45), ("11:00", 30), ("11:15", 60), ("14:00", 120)] {
        let _ = store
            .book_appointment(Ulid::new(), salon, &booking(time, duration))
            .await;
    }

    let slots = engine
        .available_time_slots(&slots_query(salon, MONDAY, 45))
        .await
        .unwrap();
    for s in &slots {
        let check = engine
            .check_time_slot(&check_query(salon, &s.time, 45, &[]))
            .await
            .unwrap();
        assert_eq!(check.available, s.available, "{}", s.time);
        assert_eq!(check.reason, s.reason, "{}", s.time);
    }
}
