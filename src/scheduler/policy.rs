use async_trait::async_trait;

use crate::model::Slot;
use crate::store::{CollectionStore, DateBound, SlotFilter, SlotOrder};

use super::SchedulerError;

/// Optional double-booking rules consulted before `publish` and `book`.
///
/// Checks run against a fresh read but are not part of the commit
/// transaction; two racing requests can both pass. Capacity is the only
/// guarantee enforced atomically.
#[async_trait]
pub trait OverlapPolicy: Send + Sync {
    async fn check_publish(
        &self,
        store: &dyn CollectionStore,
        candidate: &Slot,
    ) -> Result<(), SchedulerError>;

    async fn check_booking(
        &self,
        store: &dyn CollectionStore,
        student_id: &str,
        slot: &Slot,
    ) -> Result<(), SchedulerError>;
}

/// No overlap rules at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowOverlaps;

#[async_trait]
impl OverlapPolicy for AllowOverlaps {
    async fn check_publish(
        &self,
        _store: &dyn CollectionStore,
        _candidate: &Slot,
    ) -> Result<(), SchedulerError> {
        Ok(())
    }

    async fn check_booking(
        &self,
        _store: &dyn CollectionStore,
        _student_id: &str,
        _slot: &Slot,
    ) -> Result<(), SchedulerError> {
        Ok(())
    }
}

/// A mentor may not publish two overlapping windows on one date, and a
/// student may not hold two active bookings that overlap (including two
/// seats on the same slot).
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectOverlaps;

#[async_trait]
impl OverlapPolicy for RejectOverlaps {
    async fn check_publish(
        &self,
        store: &dyn CollectionStore,
        candidate: &Slot,
    ) -> Result<(), SchedulerError> {
        let filter = SlotFilter {
            mentor_id: Some(candidate.mentor_id.clone()),
            date: Some(DateBound::On(candidate.date)),
            ..Default::default()
        };
        let existing = store.query_slots(&filter, SlotOrder::DateAscTimeAsc).await?;
        if let Some(clash) = existing
            .iter()
            .find(|s| s.time_slot.overlaps(&candidate.time_slot))
        {
            return Err(SchedulerError::Overlap(format!(
                "mentor already teaches {} on {} ({})",
                clash.time_slot, clash.date, clash.id
            )));
        }
        Ok(())
    }

    async fn check_booking(
        &self,
        store: &dyn CollectionStore,
        student_id: &str,
        slot: &Slot,
    ) -> Result<(), SchedulerError> {
        let bookings = store.bookings_by_student(student_id).await?;
        if let Some(clash) = bookings.iter().find(|b| {
            b.status.is_active()
                && b.date == slot.date
                && (b.slot_id == slot.id || b.time_slot.overlaps(&slot.time_slot))
        }) {
            return Err(SchedulerError::Overlap(format!(
                "student already booked {} on {} ({})",
                clash.time_slot, clash.date, clash.id
            )));
        }
        Ok(())
    }
}
