//! In-memory salon state made durable by the write-ahead log.
//!
//! Every mutation takes the salon's write lock, appends its event to the WAL,
//! then applies it. Booking and rescheduling re-run the slot check inside that
//! same lock, which is what turns the engine's estimate into a guarantee.

mod error;
mod mutations;
mod queries;
mod state;

pub use error::StoreError;
pub use mutations::BookingRequest;
pub use state::SalonState;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::engine::parse_time_zone;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedSalonState = Arc<RwLock<SalonState>>;

// ── Group-commit WAL channel ──────────────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while one batch is being written are
/// committed together with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray buffered bytes never join the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, &mut vec![(event, response)]),
    }
}

// ── Store ─────────────────────────────────────────────────────────

pub struct Store {
    pub(super) salons: DashMap<Ulid, SharedSalonState>,
    /// Reverse lookup: closure or appointment id → salon id.
    pub(super) entity_to_salon: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serialises salon creation against compaction, which has no salon lock to take.
    pub(super) creation: Mutex<()>,
}

/// Apply an event to a salon the caller already holds. Salon creation is
/// handled at the map level.
fn apply_to_salon(state: &mut SalonState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SalonCreated { .. } => {}
        Event::SalonUpdated { name, time_zone, capacity, .. } => {
            state.name = name.clone();
            state.capacity = *capacity;
            match parse_time_zone(time_zone) {
                Ok(tz) => state.time_zone = tz,
                Err(e) => tracing::warn!("salon {}: keeping zone, {e}", state.id),
            }
        }
        Event::BusinessHoursSet { hours, .. } => state.set_hours(*hours),
        Event::ClosureAdded { salon_id, closure } => {
            state.closures.push(closure.clone());
            index.insert(closure.id, *salon_id);
        }
        Event::ClosureRemoved { id, .. } => {
            state.closures.retain(|c| c.id != *id);
            index.remove(id);
        }
        Event::AppointmentBooked { id, salon_id, span } => {
            state.insert_appointment(Appointment {
                id: *id,
                salon_id: *salon_id,
                span: *span,
                status: AppointmentStatus::Booked,
            });
            index.insert(*id, *salon_id);
        }
        Event::AppointmentRescheduled { id, span, .. } => {
            if let Some(mut a) = state.remove_appointment(*id) {
                a.span = *span;
                state.insert_appointment(a);
            }
        }
        Event::AppointmentStatusChanged { id, status, .. } => state.set_status(*id, *status),
    }
}

impl Store {
    /// Replay the WAL at `wal_path` and start its writer task.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let entity_to_salon = DashMap::new();
        let mut salons: HashMap<Ulid, SalonState> = HashMap::new();
        for event in &events {
            match event {
                Event::SalonCreated { id, name, time_zone, capacity } => {
                    let tz = parse_time_zone(time_zone)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                    salons.insert(*id, SalonState::new(*id, name.clone(), tz, *capacity));
                }
                other => {
                    if let Some(state) = salons.get_mut(&other.salon_id()) {
                        apply_to_salon(state, other, &entity_to_salon);
                    }
                }
            }
        }
        metrics::gauge!(observability::SALONS_ACTIVE).set(salons.len() as f64);
        tracing::info!(
            "replayed {} events into {} salons from {}",
            events.len(),
            salons.len(),
            wal_path.display()
        );

        Ok(Self {
            salons: salons
                .into_iter()
                .map(|(id, s)| (id, Arc::new(RwLock::new(s))))
                .collect(),
            entity_to_salon,
            wal_tx,
            creation: Mutex::new(()),
        })
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub fn salon(&self, id: &Ulid) -> Option<SharedSalonState> {
        self.salons.get(id).map(|e| e.value().clone())
    }

    pub fn salon_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_salon.get(entity_id).map(|e| *e.value())
    }

    pub fn salon_count(&self) -> usize {
        self.salons.len()
    }

    /// WAL-append then apply, under the caller's lock.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut SalonState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_salon(state, event, &self.entity_to_salon);
        Ok(())
    }

    /// Like `persist_and_apply`, for an event that introduces entity `id`.
    /// The id is claimed in the entity index before the WAL append, so
    /// concurrent inserts of one id can't both land, even across salons.
    pub(super) async fn persist_new_entity(
        &self,
        state: &mut SalonState,
        id: Ulid,
        event: &Event,
    ) -> Result<(), StoreError> {
        match self.entity_to_salon.entry(id) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(state.id);
            }
        }
        if let Err(e) = self.wal_append(event).await {
            self.entity_to_salon.remove(&id);
            return Err(e);
        }
        apply_to_salon(state, event, &self.entity_to_salon);
        Ok(())
    }

    /// Owning salon of a closure or appointment, write-locked.
    pub(super) async fn entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SalonState>, StoreError> {
        let salon_id = self
            .salon_for_entity(entity_id)
            .ok_or(StoreError::NotFound(*entity_id))?;
        let salon = self.salon(&salon_id).ok_or(StoreError::NotFound(salon_id))?;
        Ok(salon.write_owned().await)
    }
}
