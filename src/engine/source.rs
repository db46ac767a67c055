//! Read-side contracts the engine consumes. Implementations do I/O; the engine
//! never retries and never swallows their errors.

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::SourceError;

#[async_trait]
pub trait BusinessHoursProvider: Send + Sync {
    /// Weekly hours for one weekday, or `None` when no record exists.
    async fn business_hours(
        &self,
        salon_id: Ulid,
        weekday: Weekday,
    ) -> Result<Option<BusinessHours>, SourceError>;
}

#[async_trait]
pub trait ClosureProvider: Send + Sync {
    /// Whether any ad-hoc closure covers `date` (salon-local calendar day).
    async fn closure_on(&self, salon_id: Ulid, date: NaiveDate) -> Result<ClosureStatus, SourceError>;
}

#[async_trait]
pub trait AppointmentProvider: Send + Sync {
    /// Appointments holding capacity (BOOKED or COMPLETED) whose start falls in `window`.
    async fn appointments_starting_in(
        &self,
        salon_id: Ulid,
        window: Span,
    ) -> Result<Vec<BookedInterval>, SourceError>;
}

#[async_trait]
pub trait CapacityProvider: Send + Sync {
    async fn capacity(&self, salon_id: Ulid) -> Result<Capacity, SourceError>;
}

/// Everything the availability engine reads.
pub trait ScheduleSource:
    BusinessHoursProvider + ClosureProvider + AppointmentProvider + CapacityProvider
{
}

impl<T> ScheduleSource for T where
    T: BusinessHoursProvider + ClosureProvider + AppointmentProvider + CapacityProvider
{
}
