use chrono::NaiveDate;
use chrono_tz::Tz;
use ulid::Ulid;

use crate::engine::{closure_status, day_window, DaySchedule};
use crate::model::*;

/// Everything the store knows about one salon. Guarded by the salon's lock.
#[derive(Debug, Clone)]
pub struct SalonState {
    pub id: Ulid,
    pub name: Option<String>,
    pub time_zone: Tz,
    pub capacity: Capacity,
    /// Indexed by `Weekday::index()`.
    pub hours: [Option<BusinessHours>; 7],
    pub closures: Vec<SalonClosure>,
    /// Sorted by `span.start`. Canceled appointments stay for history.
    pub appointments: Vec<Appointment>,
}

impl SalonState {
    pub fn new(id: Ulid, name: Option<String>, time_zone: Tz, capacity: Capacity) -> Self {
        Self {
            id,
            name,
            time_zone,
            capacity,
            hours: [None; 7],
            closures: Vec::new(),
            appointments: Vec::new(),
        }
    }

    pub fn info(&self) -> SalonInfo {
        SalonInfo {
            id: self.id,
            name: self.name.clone(),
            time_zone: self.time_zone,
            capacity: self.capacity,
        }
    }

    pub fn hours_for(&self, weekday: Weekday) -> Option<BusinessHours> {
        self.hours[weekday.index()]
    }

    pub fn set_hours(&mut self, hours: BusinessHours) {
        self.hours[hours.weekday.index()] = Some(hours);
    }

    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn set_status(&mut self, id: Ulid, status: AppointmentStatus) {
        if let Some(a) = self.appointments.iter_mut().find(|a| a.id == id) {
            a.status = status;
        }
    }

    /// Capacity-holding appointments whose start lies in `window`.
    pub fn booked_starting_in(&self, window: Span) -> Vec<BookedInterval> {
        let lo = self.appointments.partition_point(|a| a.span.start < window.start);
        let hi = self.appointments.partition_point(|a| a.span.start < window.end);
        self.appointments[lo..hi]
            .iter()
            .filter(|a| a.status.holds_capacity())
            .map(|a| BookedInterval { id: a.id, span: a.span })
            .collect()
    }

    /// Same snapshot the engine would read through the providers, taken from
    /// state the caller already holds locked.
    pub fn day_schedule(&self, date: NaiveDate) -> DaySchedule {
        DaySchedule {
            date,
            time_zone: self.time_zone,
            hours: self.hours_for(Weekday::of(date)).filter(|h| h.open_window().is_some()),
            closure: closure_status(&self.closures, date),
            capacity: self.capacity,
            appointments: self.booked_starting_in(day_window(&self.time_zone, date)),
        }
    }

    /// Minimal events that rebuild this salon from nothing.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = vec![Event::SalonCreated {
            id: self.id,
            name: self.name.clone(),
            time_zone: self.time_zone.name().to_string(),
            capacity: self.capacity,
        }];
        events.extend(self.hours.iter().flatten().map(|h| Event::BusinessHoursSet {
            salon_id: self.id,
            hours: *h,
        }));
        events.extend(self.closures.iter().map(|c| Event::ClosureAdded {
            salon_id: self.id,
            closure: c.clone(),
        }));
        for a in &self.appointments {
            events.push(Event::AppointmentBooked {
                id: a.id,
                salon_id: self.id,
                span: a.span,
            });
            if a.status != AppointmentStatus::Booked {
                events.push(Event::AppointmentStatusChanged {
                    id: a.id,
                    salon_id: self.id,
                    status: a.status,
                });
            }
        }
        events
    }
}
