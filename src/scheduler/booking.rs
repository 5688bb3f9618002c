use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::conference::RoomId;
use crate::model::*;
use crate::observability::{
    BOOKING_CONFLICTS_TOTAL, BOOKINGS_TOTAL, CANCELLATIONS_TOTAL, SLOTS_PUBLISHED_TOTAL,
};
use crate::store::{OccupancyUpdate, StoreError, Versioned};

use super::validate::{self, PublishRequest};
use super::{Scheduler, SchedulerError};

fn record_booking(outcome: &'static str) {
    metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
}

impl Scheduler {
    /// Publish a new slot owned by `caller` with a fresh room id, empty and
    /// open.
    pub async fn publish(
        &self,
        caller: &Caller,
        request: PublishRequest,
    ) -> Result<Slot, SchedulerError> {
        validate::require_role(caller, Role::Mentor)?;
        validate::identity(caller)?;
        let valid = validate::publish(request)?;

        let now = self.clock.now_ms();
        let slot = Slot {
            id: Ulid::new(),
            mentor_id: caller.id.clone(),
            mentor_name: caller.name.clone(),
            mentor_email: caller.email.clone(),
            subject: valid.subject,
            date: valid.date,
            time_slot: valid.time_slot,
            max_occupants: valid.max_occupants,
            current_occupants: 0,
            is_available: true,
            room_id: RoomId::generate(&self.options.room_prefix, now),
            description: valid.description,
            created_at: now,
        };
        self.policy.check_publish(self.store.as_ref(), &slot).await?;
        self.store.insert_slot(slot.clone()).await?;

        metrics::counter!(SLOTS_PUBLISHED_TOTAL).increment(1);
        info!(
            slot_id = %slot.id,
            mentor_id = %slot.mentor_id,
            subject = %slot.subject,
            date = %slot.date,
            time_slot = %slot.time_slot,
            "slot published"
        );
        Ok(slot)
    }

    /// Reserve one seat on `slot_id` for `caller`.
    ///
    /// Read, capacity check, booking insert and occupancy increment commit as
    /// one conditional write. A version conflict re-reads and retries. Every
    /// conflict means another write landed on the slot, so the retry budget
    /// grows by one per seat: a booking can lose at most one race per seat
    /// before the slot is either taken by it or full. If the budget still runs
    /// out (seats being released and retaken meanwhile) the slot is read once
    /// more and only reported full when it really is.
    pub async fn book(&self, caller: &Caller, slot_id: SlotId) -> Result<Booking, SchedulerError> {
        validate::require_role(caller, Role::Student)?;
        validate::identity(caller)?;

        let mut attempts = self.attempts();
        let mut attempt = 0;
        while attempt < attempts {
            attempt += 1;
            let Versioned { version, doc: slot } = self
                .store
                .get_slot(slot_id)
                .await?
                .ok_or(SchedulerError::NotFound(slot_id))?;
            if attempt == 1 {
                attempts = attempts.saturating_add(slot.max_occupants);
            }
            if !slot.has_capacity() {
                record_booking("full");
                debug!(%slot_id, attempt, "slot is full");
                return Err(SchedulerError::CapacityExceeded(slot_id));
            }
            self.policy
                .check_booking(self.store.as_ref(), &caller.id, &slot)
                .await?;

            let booking = Booking::snapshot(Ulid::new(), &slot, caller, self.clock.now_ms());
            let update = OccupancyUpdate {
                slot_id,
                expected_version: version,
                occupancy: Occupancy::for_capacity(slot.current_occupants + 1, slot.max_occupants),
            };
            match self.store.commit_booking(booking.clone(), update).await {
                Ok(()) => {
                    record_booking("confirmed");
                    info!(
                        %slot_id,
                        booking_id = %booking.id,
                        student_id = %booking.student_id,
                        occupants = update.occupancy.current_occupants,
                        attempt,
                        "booking confirmed"
                    );
                    return Ok(booking);
                }
                Err(StoreError::Full(_)) => {
                    record_booking("full");
                    debug!(%slot_id, attempt, "slot filled before commit");
                    return Err(SchedulerError::CapacityExceeded(slot_id));
                }
                Err(StoreError::Conflict(_)) => {
                    metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
                    debug!(%slot_id, attempt, "booking conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    record_booking("error");
                    return Err(e.into());
                }
            }
        }

        let slot = self
            .store
            .get_slot(slot_id)
            .await?
            .ok_or(SchedulerError::NotFound(slot_id))?
            .doc;
        if !slot.has_capacity() {
            record_booking("full");
            return Err(SchedulerError::CapacityExceeded(slot_id));
        }
        record_booking("contended");
        warn!(%slot_id, attempts, "booking gave up after repeated conflicts");
        Err(SchedulerError::StoreUnavailable(format!(
            "slot {slot_id} still contended after {attempts} attempts"
        )))
    }

    /// Cancel one of the caller's own bookings and give its seat back.
    ///
    /// The booking is kept with status `cancelled`. Retried on conflict like
    /// [`Scheduler::book`]; running out of attempts is reported as a
    /// transient store failure.
    pub async fn cancel(
        &self,
        caller: &Caller,
        booking_id: BookingId,
    ) -> Result<Booking, SchedulerError> {
        validate::require_role(caller, Role::Student)?;

        let attempts = self.attempts();
        for attempt in 1..=attempts {
            let mut booking = self
                .store
                .get_booking(booking_id)
                .await?
                .ok_or(SchedulerError::BookingNotFound(booking_id))?;
            if booking.student_id != caller.id {
                return Err(SchedulerError::Forbidden(
                    "booking belongs to another student".into(),
                ));
            }
            if !booking.status.can_transition_to(BookingStatus::Cancelled) {
                return Err(SchedulerError::InvalidTransition {
                    from: booking.status,
                    to: BookingStatus::Cancelled,
                });
            }
            let Versioned { version, doc: slot } = self
                .store
                .get_slot(booking.slot_id)
                .await?
                .ok_or(SchedulerError::NotFound(booking.slot_id))?;

            let update = OccupancyUpdate {
                slot_id: slot.id,
                expected_version: version,
                occupancy: Occupancy::for_capacity(
                    slot.current_occupants.saturating_sub(1),
                    slot.max_occupants,
                ),
            };
            match self.store.commit_cancellation(booking_id, update).await {
                Ok(()) => {
                    metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
                    info!(
                        slot_id = %slot.id,
                        %booking_id,
                        occupants = update.occupancy.current_occupants,
                        attempt,
                        "booking cancelled"
                    );
                    booking.status = BookingStatus::Cancelled;
                    return Ok(booking);
                }
                Err(StoreError::Conflict(_)) => {
                    debug!(%booking_id, attempt, "cancellation conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(%booking_id, attempts, "cancellation gave up after repeated conflicts");
        Err(SchedulerError::StoreUnavailable(format!(
            "booking {booking_id} still contended after {attempts} attempts"
        )))
    }

    /// All of a student's bookings, newest date first.
    pub async fn list_by_student(&self, student_id: &str) -> Result<Vec<Booking>, SchedulerError> {
        if student_id.trim().is_empty() {
            return Err(SchedulerError::Validation("student id is required".into()));
        }
        Ok(self.store.bookings_by_student(student_id).await?)
    }

    pub async fn student_summary(
        &self,
        student_id: &str,
    ) -> Result<StudentSummary, SchedulerError> {
        let bookings = self.list_by_student(student_id).await?;
        let now = self.clock.local_now();
        let mut summary = StudentSummary {
            total: bookings.len(),
            ..Default::default()
        };
        for b in &bookings {
            match b.status {
                BookingStatus::Confirmed => {
                    summary.confirmed += 1;
                    if b.phase_at(now) == SessionPhase::Live {
                        summary.live_now += 1;
                    }
                }
                BookingStatus::Completed => summary.completed += 1,
                BookingStatus::Pending | BookingStatus::Cancelled => {}
            }
        }
        Ok(summary)
    }
}
