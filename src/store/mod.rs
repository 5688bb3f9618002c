//! Document store for the `slots` and `bookings` collections.
//!
//! [`CollectionStore`] is the access pattern the scheduler needs: equality and
//! date-bound queries, ordered reads, and two conditional transactions that
//! apply only if the slot is still at the version the caller read.
//! [`WalStore`] implements it in memory, durably backed by a group-commit WAL.

mod error;
mod mutations;
mod queries;

pub use error::StoreError;

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::warn;

use crate::model::*;
use crate::wal::Wal;

/// A document and the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub doc: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    On(SlotDate),
    OnOrAfter(SlotDate),
}

/// Conjunction of equality / date-bound predicates over the `slots` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotFilter {
    pub subject: Option<String>,
    pub mentor_id: Option<String>,
    pub is_available: Option<bool>,
    pub date: Option<DateBound>,
}

impl SlotFilter {
    pub fn matches(&self, slot: &Slot) -> bool {
        if self.subject.as_deref().is_some_and(|s| s != slot.subject) {
            return false;
        }
        if self.mentor_id.as_deref().is_some_and(|m| m != slot.mentor_id) {
            return false;
        }
        if self.is_available.is_some_and(|a| a != slot.is_available) {
            return false;
        }
        match self.date {
            Some(DateBound::On(d)) => slot.date == d,
            Some(DateBound::OnOrAfter(d)) => slot.date >= d,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOrder {
    DateAscTimeAsc,
    DateDescTimeAsc,
}

impl SlotOrder {
    /// Ties on (date, window) fall back to id, i.e. creation order.
    pub fn sort(self, slots: &mut [Slot]) {
        match self {
            SlotOrder::DateAscTimeAsc => slots.sort_by(|a, b| {
                a.date
                    .cmp(&b.date)
                    .then(a.time_slot.cmp(&b.time_slot))
                    .then(a.id.cmp(&b.id))
            }),
            SlotOrder::DateDescTimeAsc => slots.sort_by(|a, b| {
                b.date
                    .cmp(&a.date)
                    .then(a.time_slot.cmp(&b.time_slot))
                    .then(a.id.cmp(&b.id))
            }),
        }
    }
}

/// Occupancy write guarded by the slot version the caller based it on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupancyUpdate {
    pub slot_id: SlotId,
    pub expected_version: u64,
    pub occupancy: Occupancy,
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn insert_slot(&self, slot: Slot) -> Result<(), StoreError>;

    async fn get_slot(&self, id: SlotId) -> Result<Option<Versioned<Slot>>, StoreError>;

    async fn query_slots(
        &self,
        filter: &SlotFilter,
        order: SlotOrder,
    ) -> Result<Vec<Slot>, StoreError>;

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Ordered by date descending, then window ascending.
    async fn bookings_by_student(&self, student_id: &str) -> Result<Vec<Booking>, StoreError>;

    /// Insert `booking` and write `update.occupancy` as one transaction.
    /// Fails with [`StoreError::Conflict`] if the slot moved past
    /// `update.expected_version`.
    async fn commit_booking(
        &self,
        booking: Booking,
        update: OccupancyUpdate,
    ) -> Result<(), StoreError>;

    /// Mark the booking cancelled and write `update.occupancy` as one
    /// transaction, under the same version rule as [`Self::commit_booking`].
    async fn commit_cancellation(
        &self,
        booking_id: BookingId,
        update: OccupancyUpdate,
    ) -> Result<(), StoreError>;
}

// ── Group-commit WAL channel ─────────────────────────────

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

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// fsync once for the whole batch and answer every sender.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

fn commit_batch(wal: &mut Wal<Event>, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!(batch = batch.len(), "WAL flush failed: {e}");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// All or nothing: a batch that fails to encode or sync leaves no trace in
/// the log.
fn flush_batch(wal: &mut Wal<Event>, batch: &[PendingAppend]) -> io::Result<()> {
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            wal.discard_pending();
            return Err(e);
        }
    }
    wal.flush_sync()
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── In-memory documents ──────────────────────────────────

pub(crate) struct SlotDoc {
    /// Bumped on every applied mutation; never persisted.
    pub version: u64,
    pub slot: Slot,
}

pub(crate) type SharedSlot = Arc<RwLock<SlotDoc>>;

/// Documents plus secondary indexes. Bookings are only mutated while the
/// owning slot's write lock is held.
#[derive(Default)]
pub(crate) struct Documents {
    pub slots: DashMap<SlotId, SharedSlot>,
    pub bookings: DashMap<BookingId, Booking>,
    by_subject: DashMap<String, Vec<SlotId>>,
    by_mentor: DashMap<String, Vec<SlotId>>,
    by_student: DashMap<String, Vec<BookingId>>,
    by_slot: DashMap<SlotId, Vec<BookingId>>,
}

impl Documents {
    fn insert_slot(&self, slot: Slot) {
        let id = slot.id;
        self.by_subject.entry(slot.subject.clone()).or_default().push(id);
        self.by_mentor.entry(slot.mentor_id.clone()).or_default().push(id);
        self.slots
            .insert(id, Arc::new(RwLock::new(SlotDoc { version: 1, slot })));
    }

    /// Apply a booking-level event. The caller holds the slot's write lock.
    fn apply_to_slot(&self, doc: &mut SlotDoc, event: &Event) {
        match event {
            Event::BookingCommitted { booking, occupancy } => {
                if !self.bookings.contains_key(&booking.id) {
                    self.by_student
                        .entry(booking.student_id.clone())
                        .or_default()
                        .push(booking.id);
                    self.by_slot.entry(booking.slot_id).or_default().push(booking.id);
                }
                self.bookings.insert(booking.id, booking.clone());
                doc.slot.set_occupancy(*occupancy);
            }
            Event::BookingCancelled { booking_id, occupancy, .. } => {
                if let Some(mut booking) = self.bookings.get_mut(booking_id) {
                    booking.status = BookingStatus::Cancelled;
                }
                doc.slot.set_occupancy(*occupancy);
            }
            // Inserted at the map level, never applied to an existing document.
            Event::SlotPublished { .. } => return,
        }
        doc.version += 1;
    }

    pub fn slot_handle(&self, id: &SlotId) -> Option<SharedSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn slot_ids_for_subject(&self, subject: &str) -> Vec<SlotId> {
        self.by_subject.get(subject).map(|e| e.value().clone()).unwrap_or_default()
    }

    pub fn slot_ids_for_mentor(&self, mentor_id: &str) -> Vec<SlotId> {
        self.by_mentor.get(mentor_id).map(|e| e.value().clone()).unwrap_or_default()
    }

    pub fn booking_ids_for_student(&self, student_id: &str) -> Vec<BookingId> {
        self.by_student.get(student_id).map(|e| e.value().clone()).unwrap_or_default()
    }

    pub fn booking_ids_for_slot(&self, slot_id: &SlotId) -> Vec<BookingId> {
        self.by_slot.get(slot_id).map(|e| e.value().clone()).unwrap_or_default()
    }
}

pub struct WalStore {
    pub(crate) docs: Documents,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// write can land in the old log after the snapshot was taken.
    gate: RwLock<()>,
}

impl WalStore {
    /// Replay the log at `wal_path` and start its writer task. Must be called
    /// from within a Tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::<Event>::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let docs = Documents::default();
        // Sole owner of every Arc here, so try_write never contends. Blocking
        // lock calls are off-limits: this can run inside an async context.
        for event in events {
            match event {
                Event::SlotPublished { slot } => docs.insert_slot(slot),
                other => {
                    let Some(shared) = docs.slot_handle(&other.slot_id()) else {
                        warn!(slot_id = %other.slot_id(), "replay: event for unknown slot");
                        continue;
                    };
                    match shared.try_write() {
                        Ok(mut doc) => docs.apply_to_slot(&mut doc, &other),
                        Err(_) => {
                            warn!(slot_id = %other.slot_id(), "replay: slot unexpectedly locked")
                        }
                    };
                }
            }
        }

        Ok(Self {
            docs,
            wal_tx,
            gate: RwLock::new(()),
        })
    }

    pub fn slot_count(&self) -> usize {
        self.docs.slots.len()
    }

    pub fn booking_count(&self) -> usize {
        self.docs.bookings.len()
    }

    /// Write event to the WAL via the group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// WAL-append then apply, under the slot's write lock.
    async fn persist_and_apply(&self, doc: &mut SlotDoc, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        self.docs.apply_to_slot(doc, event);
        Ok(())
    }
}

#[async_trait]
impl CollectionStore for WalStore {
    async fn insert_slot(&self, slot: Slot) -> Result<(), StoreError> {
        WalStore::insert_slot(self, slot).await
    }

    async fn get_slot(&self, id: SlotId) -> Result<Option<Versioned<Slot>>, StoreError> {
        Ok(WalStore::get_slot(self, id).await)
    }

    async fn query_slots(
        &self,
        filter: &SlotFilter,
        order: SlotOrder,
    ) -> Result<Vec<Slot>, StoreError> {
        Ok(WalStore::query_slots(self, filter, order).await)
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(WalStore::get_booking(self, id))
    }

    async fn bookings_by_student(&self, student_id: &str) -> Result<Vec<Booking>, StoreError> {
        Ok(WalStore::bookings_by_student(self, student_id))
    }

    async fn commit_booking(
        &self,
        booking: Booking,
        update: OccupancyUpdate,
    ) -> Result<(), StoreError> {
        WalStore::commit_booking(self, booking, update).await
    }

    async fn commit_cancellation(
        &self,
        booking_id: BookingId,
        update: OccupancyUpdate,
    ) -> Result<(), StoreError> {
        WalStore::commit_cancellation(self, booking_id, update).await
    }
}
