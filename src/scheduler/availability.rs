use tracing::debug;

use crate::clock::LocalNow;
use crate::model::{Slot, SlotDate};
use crate::store::{DateBound, SlotFilter, SlotOrder};

use super::{Scheduler, SchedulerError};

/// Fine-grained temporal filter applied after the coarse store query: past
/// dates are out, and a slot dated today survives only if its window starts
/// strictly after the current minute.
pub fn is_still_bookable(slot: &Slot, now: &LocalNow) -> bool {
    if slot.date < now.date {
        false
    } else if slot.date == now.date {
        slot.time_slot.start() > now.time
    } else {
        true
    }
}

impl Scheduler {
    /// Open slots for `subject`, earliest first. With `date` the store
    /// query is an exact date match; without it, everything from today on.
    pub async fn find_available(
        &self,
        subject: &str,
        date: Option<&str>,
    ) -> Result<Vec<Slot>, SchedulerError> {
        if subject.trim().is_empty() {
            return Err(SchedulerError::Validation("subject is required".into()));
        }
        let date = date.map(SlotDate::parse).transpose()?;
        let now = LocalNow::read(self.clock.as_ref());

        let filter = SlotFilter {
            subject: Some(subject.to_string()),
            is_available: Some(true),
            date: Some(match date {
                Some(d) => DateBound::On(d),
                None => DateBound::OnOrAfter(now.date),
            }),
            ..Default::default()
        };
        let mut slots = self
            .store
            .query_slots(&filter, SlotOrder::DateAscTimeAsc)
            .await?;
        let fetched = slots.len();
        slots.retain(|s| is_still_bookable(s, &now));
        debug!(subject, fetched, returned = slots.len(), "find_available");
        Ok(slots)
    }

    /// Every slot the mentor ever published, newest date first, unfiltered
    /// by time.
    pub async fn find_by_owner(&self, mentor_id: &str) -> Result<Vec<Slot>, SchedulerError> {
        if mentor_id.trim().is_empty() {
            return Err(SchedulerError::Validation("mentor id is required".into()));
        }
        let filter = SlotFilter {
            mentor_id: Some(mentor_id.to_string()),
            ..Default::default()
        };
        Ok(self
            .store
            .query_slots(&filter, SlotOrder::DateDescTimeAsc)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{at, slot};

    #[test]
    fn today_start_must_be_strictly_after_now() {
        let s = slot("math", "2026-10-18", "09:00-10:00", 1);
        assert!(is_still_bookable(&s, &LocalNow::of(at("2026-10-18", "08:59"))));
        assert!(!is_still_bookable(&s, &LocalNow::of(at("2026-10-18", "09:00"))));
        assert!(!is_still_bookable(&s, &LocalNow::of(at("2026-10-18", "09:01"))));
    }

    #[test]
    fn other_days() {
        let s = slot("math", "2026-10-18", "09:00-10:00", 1);
        assert!(is_still_bookable(&s, &LocalNow::of(at("2026-10-17", "23:59"))));
        assert!(!is_still_bookable(&s, &LocalNow::of(at("2026-10-19", "00:00"))));
    }
}
