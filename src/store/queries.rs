use crate::model::*;

use super::{SharedSlot, SlotFilter, SlotOrder, Versioned, WalStore};

impl WalStore {
    pub async fn get_slot(&self, id: SlotId) -> Option<Versioned<Slot>> {
        let shared = self.docs.slot_handle(&id)?;
        let doc = shared.read().await;
        Some(Versioned {
            version: doc.version,
            doc: doc.slot.clone(),
        })
    }

    pub async fn query_slots(&self, filter: &SlotFilter, order: SlotOrder) -> Vec<Slot> {
        let mut out = Vec::new();
        for shared in self.candidates(filter) {
            let doc = shared.read().await;
            if filter.matches(&doc.slot) {
                out.push(doc.slot.clone());
            }
        }
        order.sort(&mut out);
        out
    }

    /// Narrow by the most selective equality index the filter names.
    fn candidates(&self, filter: &SlotFilter) -> Vec<SharedSlot> {
        let ids = if let Some(mentor_id) = &filter.mentor_id {
            Some(self.docs.slot_ids_for_mentor(mentor_id))
        } else {
            filter
                .subject
                .as_deref()
                .map(|subject| self.docs.slot_ids_for_subject(subject))
        };
        match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.docs.slot_handle(id))
                .collect(),
            None => self.docs.slots.iter().map(|e| e.value().clone()).collect(),
        }
    }

    pub fn get_booking(&self, id: BookingId) -> Option<Booking> {
        self.docs.bookings.get(&id).map(|b| b.value().clone())
    }

    /// Date descending, then window ascending.
    pub fn bookings_by_student(&self, student_id: &str) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .docs
            .booking_ids_for_student(student_id)
            .iter()
            .filter_map(|id| self.get_booking(*id))
            .collect();
        out.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(a.time_slot.cmp(&b.time_slot))
                .then(a.id.cmp(&b.id))
        });
        out
    }

    /// In commit order.
    pub fn bookings_for_slot(&self, slot_id: SlotId) -> Vec<Booking> {
        self.docs
            .booking_ids_for_slot(&slot_id)
            .iter()
            .filter_map(|id| self.get_booking(*id))
            .collect()
    }
}
