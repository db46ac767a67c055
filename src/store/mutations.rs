use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::engine::{parse_time_zone, validate_duration};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::time::{parse_date, time_to_minutes, MINUTES_PER_DAY};

use super::{SalonState, Store, StoreError, WalCommand};

/// A new appointment, or a new placement for an existing one.
#[derive(Debug, Clone)]
pub struct BookingRequest<'a> {
    pub date: &'a str,
    pub time: &'a str,
    pub duration_minutes: i64,
    /// Current instant; booking into the past is refused when set.
    pub now: Option<Ms>,
}

fn validate_name(name: &Option<String>) -> Result<(), StoreError> {
    match name {
        Some(n) if n.len() > MAX_NAME_LEN => Err(StoreError::LimitExceeded("salon name too long")),
        _ => Ok(()),
    }
}

fn validate_zone(time_zone: &str) -> Result<Tz, StoreError> {
    if time_zone.len() > MAX_TIME_ZONE_LEN {
        return Err(StoreError::LimitExceeded("time zone name too long"));
    }
    Ok(parse_time_zone(time_zone)?)
}

impl Store {
    pub async fn create_salon(
        &self,
        id: Ulid,
        name: Option<String>,
        time_zone: &str,
        capacity: Capacity,
    ) -> Result<(), StoreError> {
        validate_name(&name)?;
        let tz = validate_zone(time_zone)?;

        let _creation = self.creation.lock().await;
        if self.salons.len() >= MAX_SALONS {
            return Err(StoreError::LimitExceeded("too many salons"));
        }
        if self.salons.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        let event = Event::SalonCreated {
            id,
            name: name.clone(),
            time_zone: time_zone.to_string(),
            capacity,
        };
        self.wal_append(&event).await?;
        self.salons
            .insert(id, Arc::new(RwLock::new(SalonState::new(id, name, tz, capacity))));
        metrics::gauge!(observability::SALONS_ACTIVE).set(self.salons.len() as f64);
        info!("salon {id} created in {time_zone} with capacity {capacity}");
        Ok(())
    }

    /// Replace a salon's name and zone. A `None` capacity keeps the current one.
    pub async fn update_salon(
        &self,
        id: Ulid,
        name: Option<String>,
        time_zone: &str,
        capacity: Option<Capacity>,
    ) -> Result<(), StoreError> {
        validate_name(&name)?;
        validate_zone(time_zone)?;
        let salon = self.salon(&id).ok_or(StoreError::NotFound(id))?;
        let mut guard = salon.write().await;
        let event = Event::SalonUpdated {
            id,
            name,
            time_zone: time_zone.to_string(),
            capacity: capacity.unwrap_or(guard.capacity),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("salon {id} updated");
        Ok(())
    }

    /// Upsert the weekly hours for one weekday.
    pub async fn set_business_hours(&self, salon_id: Ulid, hours: BusinessHours) -> Result<(), StoreError> {
        if hours.open > MINUTES_PER_DAY || hours.close > MINUTES_PER_DAY {
            return Err(StoreError::Invalid("business hours outside the day".into()));
        }
        if !hours.is_closed && hours.open >= hours.close {
            return Err(StoreError::Invalid(format!(
                "{}: opening time {} must be before closing time {}",
                hours.weekday,
                hours.open_time(),
                hours.close_time()
            )));
        }
        let salon = self.salon(&salon_id).ok_or(StoreError::NotFound(salon_id))?;
        let mut guard = salon.write().await;
        let event = Event::BusinessHoursSet { salon_id, hours };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_closure(&self, salon_id: Ulid, closure: SalonClosure) -> Result<(), StoreError> {
        if closure.start_date > closure.end_date {
            return Err(StoreError::Invalid(format!(
                "closure starts {} after it ends {}",
                closure.start_date, closure.end_date
            )));
        }
        if (closure.end_date - closure.start_date).num_days() >= MAX_CLOSURE_DAYS {
            return Err(StoreError::LimitExceeded("closure too long"));
        }
        if closure.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(StoreError::LimitExceeded("closure reason too long"));
        }
        let salon = self.salon(&salon_id).ok_or(StoreError::NotFound(salon_id))?;
        let mut guard = salon.write().await;
        if guard.closures.len() >= MAX_CLOSURES_PER_SALON {
            return Err(StoreError::LimitExceeded("too many closures on salon"));
        }
        let (id, start, end) = (closure.id, closure.start_date, closure.end_date);
        let event = Event::ClosureAdded { salon_id, closure };
        self.persist_new_entity(&mut guard, id, &event).await?;
        info!("salon {salon_id} closed {start}..={end} ({id})");
        Ok(())
    }

    pub async fn remove_closure(&self, id: Ulid) -> Result<Ulid, StoreError> {
        let mut guard = self.entity_write(&id).await?;
        if !guard.closures.iter().any(|c| c.id == id) {
            return Err(StoreError::NotFound(id));
        }
        let salon_id = guard.id;
        let event = Event::ClosureRemoved { id, salon_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(salon_id)
    }

    /// Book a new appointment. The slot is re-checked against current state
    /// while holding the salon's write lock, so two concurrent bookings can't
    /// both take the last seat.
    pub async fn book_appointment(
        &self,
        id: Ulid,
        salon_id: Ulid,
        req: &BookingRequest<'_>,
    ) -> Result<Appointment, StoreError> {
        let (date, start, duration) = parse_request(req)?;
        let salon = self.salon(&salon_id).ok_or(StoreError::NotFound(salon_id))?;
        let mut guard = salon.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_SALON {
            return Err(StoreError::LimitExceeded("too many appointments on salon"));
        }

        let day = guard.day_schedule(date);
        let check = day.check_slot(start, duration, &[], req.now);
        if !check.available {
            return Err(rejected(salon_id, check.reason));
        }

        let span = day.proposed_span(start, duration);
        let event = Event::AppointmentBooked { id, salon_id, span };
        self.persist_new_entity(&mut guard, id, &event).await?;
        info!("appointment {id} booked at salon {salon_id} on {date} {}", req.time);
        Ok(Appointment {
            id,
            salon_id,
            span,
            status: AppointmentStatus::Booked,
        })
    }

    /// Move a booked appointment. Its current placement is excluded from the
    /// re-check so it never collides with itself.
    pub async fn reschedule_appointment(
        &self,
        id: Ulid,
        req: &BookingRequest<'_>,
    ) -> Result<Appointment, StoreError> {
        let (date, start, duration) = parse_request(req)?;
        let mut guard = self.entity_write(&id).await?;
        let current = guard.appointment(id).cloned().ok_or(StoreError::NotFound(id))?;
        if current.status != AppointmentStatus::Booked {
            return Err(StoreError::Invalid(format!(
                "appointment {id} is {} and can't be rescheduled",
                current.status.as_str()
            )));
        }

        let day = guard.day_schedule(date);
        let check = day.check_slot(start, duration, &[id], req.now);
        if !check.available {
            return Err(rejected(guard.id, check.reason));
        }

        let span = day.proposed_span(start, duration);
        let event = Event::AppointmentRescheduled {
            id,
            salon_id: guard.id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("appointment {id} moved to {date} {}", req.time);
        Ok(Appointment { span, ..current })
    }

    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Ulid, StoreError> {
        self.transition(id, AppointmentStatus::Canceled).await
    }

    pub async fn complete_appointment(&self, id: Ulid) -> Result<Ulid, StoreError> {
        self.transition(id, AppointmentStatus::Completed).await
    }

    /// Only booked appointments change status.
    async fn transition(&self, id: Ulid, status: AppointmentStatus) -> Result<Ulid, StoreError> {
        let mut guard = self.entity_write(&id).await?;
        let current = guard.appointment(id).map(|a| a.status).ok_or(StoreError::NotFound(id))?;
        if current != AppointmentStatus::Booked {
            return Err(StoreError::Invalid(format!(
                "appointment {id} is already {}",
                current.as_str()
            )));
        }
        let salon_id = guard.id;
        let event = Event::AppointmentStatusChanged { id, salon_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("appointment {id} {}", status.as_str());
        Ok(salon_id)
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _creation = self.creation.lock().await;
        let mut ids: Vec<Ulid> = self.salons.iter().map(|e| *e.key()).collect();
        ids.sort();

        // Hold every read lock until the swap so no mutation lands in between.
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(salon) = self.salon(&id) {
                guards.push(salon.read_owned().await);
            }
        }
        let events: Vec<Event> = guards.iter().flat_map(|g| g.snapshot_events()).collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn parse_request(req: &BookingRequest<'_>) -> Result<(chrono::NaiveDate, u32, u32), StoreError> {
    let duration = validate_duration(req.duration_minutes)?;
    let date = parse_date(req.date)?;
    let start = time_to_minutes(req.time)?;
    Ok((date, start, duration))
}

fn rejected(salon_id: Ulid, reason: Option<String>) -> StoreError {
    let reason = reason.unwrap_or_else(|| "Time slot not available".into());
    metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL).increment(1);
    info!("booking at salon {salon_id} rejected: {reason}");
    StoreError::SlotUnavailable(reason)
}
