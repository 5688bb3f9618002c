use tokio::sync::oneshot;
use tracing::info;

use crate::limits::*;
use crate::model::*;

use super::{OccupancyUpdate, SlotDoc, StoreError, WalCommand, WalStore};

/// Reject a write based on a stale read.
fn check_version(doc: &SlotDoc, update: &OccupancyUpdate) -> Result<(), StoreError> {
    if doc.version != update.expected_version {
        return Err(StoreError::Conflict(update.slot_id));
    }
    Ok(())
}

/// The occupancy about to be written must keep the slot consistent.
fn check_occupancy(slot: &Slot, occupancy: Occupancy) -> Result<(), StoreError> {
    if occupancy.current_occupants > slot.max_occupants {
        return Err(StoreError::Invariant {
            id: slot.id,
            reason: "occupancy would exceed capacity",
        });
    }
    if occupancy.is_available != (occupancy.current_occupants < slot.max_occupants) {
        return Err(StoreError::Invariant {
            id: slot.id,
            reason: "availability flag disagrees with occupancy",
        });
    }
    Ok(())
}

impl WalStore {
    pub async fn insert_slot(&self, slot: Slot) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        if self.docs.slots.len() >= MAX_SLOTS_PER_TENANT {
            return Err(StoreError::LimitExceeded("too many slots"));
        }
        if self.docs.slots.contains_key(&slot.id) {
            return Err(StoreError::AlreadyExists(slot.id));
        }
        if !slot.is_consistent() {
            return Err(StoreError::Invariant {
                id: slot.id,
                reason: "inconsistent occupancy",
            });
        }

        let event = Event::SlotPublished { slot: slot.clone() };
        self.wal_append(&event).await?;
        self.docs.insert_slot(slot);
        Ok(())
    }

    pub async fn commit_booking(
        &self,
        booking: Booking,
        update: OccupancyUpdate,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let shared = self
            .docs
            .slot_handle(&update.slot_id)
            .ok_or(StoreError::NotFound(update.slot_id))?;
        let mut doc = shared.write().await;
        // A full slot is final whatever version the caller read.
        if !doc.slot.has_capacity() {
            return Err(StoreError::Full(update.slot_id));
        }
        check_version(&doc, &update)?;

        if booking.slot_id != update.slot_id {
            return Err(StoreError::Invariant {
                id: booking.id,
                reason: "booking references a different slot",
            });
        }
        if self.docs.bookings.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists(booking.id));
        }
        if self.docs.bookings.len() >= MAX_BOOKINGS_PER_TENANT {
            return Err(StoreError::LimitExceeded("too many bookings"));
        }
        check_occupancy(&doc.slot, update.occupancy)?;

        let event = Event::BookingCommitted {
            booking,
            occupancy: update.occupancy,
        };
        self.persist_and_apply(&mut doc, &event).await
    }

    pub async fn commit_cancellation(
        &self,
        booking_id: BookingId,
        update: OccupancyUpdate,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let shared = self
            .docs
            .slot_handle(&update.slot_id)
            .ok_or(StoreError::NotFound(update.slot_id))?;
        let mut doc = shared.write().await;
        check_version(&doc, &update)?;

        let booking = self
            .docs
            .bookings
            .get(&booking_id)
            .map(|b| b.value().clone())
            .ok_or(StoreError::NotFound(booking_id))?;
        if booking.slot_id != update.slot_id {
            return Err(StoreError::Invariant {
                id: booking_id,
                reason: "booking references a different slot",
            });
        }
        if !booking.status.is_active() {
            return Err(StoreError::Invariant {
                id: booking_id,
                reason: "booking is not active",
            });
        }
        check_occupancy(&doc.slot, update.occupancy)?;

        let event = Event::BookingCancelled {
            booking_id,
            slot_id: update.slot_id,
            occupancy: update.occupancy,
        };
        self.persist_and_apply(&mut doc, &event).await
    }

    /// Rewrite the WAL as one `SlotPublished` per slot followed by a
    /// `BookingCommitted` per booking carrying the slot's current occupancy.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _exclusive = self.gate.write().await;

        let mut handles: Vec<_> = self
            .docs
            .slots
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);

        let mut events = Vec::with_capacity(handles.len() + self.docs.bookings.len());
        for (slot_id, shared) in handles {
            let doc = shared.read().await;
            let occupancy = doc.slot.occupancy();
            events.push(Event::SlotPublished {
                slot: doc.slot.clone(),
            });
            for booking in self.bookings_for_slot(slot_id) {
                events.push(Event::BookingCommitted { booking, occupancy });
            }
        }

        let records = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!(records, "compacted WAL");
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
