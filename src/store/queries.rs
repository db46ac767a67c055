use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::engine::schedule::closure_status;
use crate::engine::{
    AppointmentProvider, BusinessHoursProvider, CapacityProvider, ClosureProvider, SourceError,
};
use crate::model::*;

use super::{SharedSalonState, Store, StoreError};

impl Store {
    fn salon_or_missing(&self, id: Ulid) -> Result<SharedSalonState, SourceError> {
        self.salon(&id).ok_or(SourceError::SalonNotFound(id))
    }

    pub async fn salon_info(&self, id: Ulid) -> Result<SalonInfo, StoreError> {
        let salon = self.salon(&id).ok_or(StoreError::NotFound(id))?;
        let guard = salon.read().await;
        Ok(guard.info())
    }

    /// All salons, ordered by id.
    pub async fn list_salons(&self) -> Vec<SalonInfo> {
        let shared: Vec<SharedSalonState> = self.salons.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for salon in shared {
            out.push(salon.read().await.info());
        }
        out.sort_by_key(|s| s.id);
        out
    }

    /// Weekly hours on record, Monday first.
    pub async fn list_business_hours(&self, salon_id: Ulid) -> Result<Vec<BusinessHours>, StoreError> {
        let salon = self.salon(&salon_id).ok_or(StoreError::NotFound(salon_id))?;
        let guard = salon.read().await;
        Ok(guard.hours.iter().flatten().copied().collect())
    }

    pub async fn list_closures(&self, salon_id: Ulid) -> Result<Vec<SalonClosure>, StoreError> {
        let salon = self.salon(&salon_id).ok_or(StoreError::NotFound(salon_id))?;
        let guard = salon.read().await;
        let mut closures = guard.closures.clone();
        closures.sort_by_key(|c| (c.start_date, c.id));
        Ok(closures)
    }

    /// Appointments of every status, ordered by start.
    pub async fn list_appointments(&self, salon_id: Ulid) -> Result<Vec<Appointment>, StoreError> {
        let salon = self.salon(&salon_id).ok_or(StoreError::NotFound(salon_id))?;
        let guard = salon.read().await;
        Ok(guard.appointments.clone())
    }

    pub async fn appointment(&self, id: Ulid) -> Result<Appointment, StoreError> {
        let salon_id = self.salon_for_entity(&id).ok_or(StoreError::NotFound(id))?;
        let salon = self.salon(&salon_id).ok_or(StoreError::NotFound(salon_id))?;
        let guard = salon.read().await;
        guard.appointment(id).cloned().ok_or(StoreError::NotFound(id))
    }
}

// ── Engine collaborators ──────────────────────────────────────────

#[async_trait]
impl BusinessHoursProvider for Store {
    async fn business_hours(
        &self,
        salon_id: Ulid,
        weekday: Weekday,
    ) -> Result<Option<BusinessHours>, SourceError> {
        let salon = self.salon_or_missing(salon_id)?;
        let guard = salon.read().await;
        Ok(guard.hours_for(weekday))
    }
}

#[async_trait]
impl ClosureProvider for Store {
    async fn closure_on(&self, salon_id: Ulid, date: NaiveDate) -> Result<ClosureStatus, SourceError> {
        let salon = self.salon_or_missing(salon_id)?;
        let guard = salon.read().await;
        Ok(closure_status(&guard.closures, date))
    }
}

#[async_trait]
impl AppointmentProvider for Store {
    async fn appointments_starting_in(
        &self,
        salon_id: Ulid,
        window: Span,
    ) -> Result<Vec<BookedInterval>, SourceError> {
        let salon = self.salon_or_missing(salon_id)?;
        let guard = salon.read().await;
        Ok(guard.booked_starting_in(window))
    }
}

#[async_trait]
impl CapacityProvider for Store {
    async fn capacity(&self, salon_id: Ulid) -> Result<Capacity, SourceError> {
        let salon = self.salon_or_missing(salon_id)?;
        let guard = salon.read().await;
        Ok(guard.capacity)
    }
}
