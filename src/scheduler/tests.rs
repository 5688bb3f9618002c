use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use ulid::Ulid;

use super::*;
use crate::clock::FixedClock;
use crate::model::fixtures::at;
use crate::model::*;
use crate::store::{
    CollectionStore, OccupancyUpdate, SlotFilter, SlotOrder, StoreError, Versioned, WalStore,
};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tutorhub_test_scheduler");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn wal_store(name: &str) -> Arc<dyn CollectionStore> {
    Arc::new(WalStore::open(&test_wal_path(name)).unwrap())
}

/// Scheduler over a fresh WAL store with its clock pinned at `now`.
fn scheduler_at(name: &str, now: NaiveDateTime) -> (Scheduler, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(now));
    let scheduler = Scheduler::new(wal_store(name)).with_clock(clock.clone());
    (scheduler, clock)
}

fn mentor() -> Caller {
    Caller::mentor("mentor-1", "Dewi", "dewi@example.com")
}

fn student(n: u32) -> Caller {
    Caller::student(format!("stu-{n}"), format!("Student {n}"), format!("s{n}@example.com"))
}

fn request(subject: &str, date: &str, window: &str, max: i64) -> PublishRequest {
    PublishRequest {
        subject: subject.into(),
        date: date.into(),
        time_slot: window.into(),
        max_occupants: max,
        description: None,
    }
}

async fn publish(s: &Scheduler, subject: &str, date: &str, window: &str, max: i64) -> Slot {
    s.publish(&mentor(), request(subject, date, window, max))
        .await
        .unwrap()
}

fn ids(slots: &[Slot]) -> Vec<SlotId> {
    slots.iter().map(|s| s.id).collect()
}

// ── Publish ──────────────────────────────────────────────

#[tokio::test]
async fn publish_initializes_empty_open_slot() {
    let (s, _) = scheduler_at("publish_init.wal", at("2026-10-18", "08:00"));
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 3).await;

    assert_eq!(slot.mentor_id, "mentor-1");
    assert_eq!(slot.mentor_name, "Dewi");
    assert_eq!(slot.current_occupants, 0);
    assert!(slot.is_available);
    assert!(slot.is_consistent());
    assert!(slot.room_id.as_str().starts_with("tutorhub-"));
    assert_eq!(slot.created_at, s.clock().now_ms());
}

#[tokio::test]
async fn publish_uses_configured_room_prefix() {
    let (s, _) = scheduler_at("publish_prefix.wal", at("2026-10-18", "08:00"));
    let s = s.with_options(SchedulerOptions {
        room_prefix: "mathclub".into(),
        ..Default::default()
    });
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 1).await;
    assert!(slot.room_id.as_str().starts_with("mathclub-"));
}

#[tokio::test]
async fn publish_requires_mentor_role() {
    let (s, _) = scheduler_at("publish_role.wal", at("2026-10-18", "08:00"));
    let result = s
        .publish(&student(1), request("math", "2026-10-20", "09:00-10:00", 1))
        .await;
    assert!(matches!(result, Err(SchedulerError::Forbidden(_))));
}

#[tokio::test]
async fn publish_validates_fields() {
    let (s, _) = scheduler_at("publish_validate.wal", at("2026-10-18", "08:00"));
    for bad in [
        request("", "2026-10-20", "09:00-10:00", 1),
        request("math", "2026-13-01", "09:00-10:00", 1),
        request("math", "2026-10-20", "9-10", 1),
        request("math", "2026-10-20", "09:00-10:00", 0),
    ] {
        assert!(matches!(
            s.publish(&mentor(), bad).await,
            Err(SchedulerError::Validation(_))
        ));
    }
    let nameless = Caller::mentor("mentor-1", "", "");
    assert!(matches!(
        s.publish(&nameless, request("math", "2026-10-20", "09:00-10:00", 1)).await,
        Err(SchedulerError::Validation(_))
    ));
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn temporal_filter_excludes_started_slot() {
    let (s, clock) = scheduler_at("temporal.wal", at("2026-10-18", "08:59"));
    let slot = publish(&s, "math", "2026-10-18", "09:00-10:00", 2).await;

    assert_eq!(ids(&s.find_available("math", None).await.unwrap()), vec![slot.id]);

    clock.set(at("2026-10-18", "09:01"));
    assert!(s.find_available("math", None).await.unwrap().is_empty());
    assert!(s.find_available("math", Some("2026-10-18")).await.unwrap().is_empty());
}

#[tokio::test]
async fn date_omitted_query_skips_past_dates() {
    let (s, _) = scheduler_at("date_omitted.wal", at("2026-10-18", "08:00"));
    publish(&s, "math", "2026-10-17", "09:00-10:00", 1).await;
    let today = publish(&s, "math", "2026-10-18", "09:00-10:00", 1).await;
    let tomorrow = publish(&s, "math", "2026-10-19", "09:00-10:00", 1).await;

    let got = s.find_available("math", None).await.unwrap();
    assert_eq!(ids(&got), vec![today.id, tomorrow.id]);
}

#[tokio::test]
async fn date_omitted_query_drops_todays_started_slot_keeps_tomorrow() {
    let (s, _) = scheduler_at("date_omitted_started.wal", at("2026-10-18", "12:00"));
    publish(&s, "math", "2026-10-17", "13:00-14:00", 1).await;
    publish(&s, "math", "2026-10-18", "09:00-10:00", 1).await;
    let later_today = publish(&s, "math", "2026-10-18", "13:00-14:00", 1).await;
    let tomorrow = publish(&s, "math", "2026-10-19", "08:00-09:00", 1).await;

    let got = s.find_available("math", None).await.unwrap();
    assert_eq!(ids(&got), vec![later_today.id, tomorrow.id]);
}

#[tokio::test]
async fn explicit_date_is_exact_match_ordered_by_window() {
    let (s, _) = scheduler_at("explicit_date.wal", at("2026-10-18", "08:00"));
    let pm = publish(&s, "math", "2026-10-20", "13:00-14:00", 1).await;
    let am = publish(&s, "math", "2026-10-20", "08:00-09:00", 1).await;
    publish(&s, "math", "2026-10-21", "08:00-09:00", 1).await;
    publish(&s, "physics", "2026-10-20", "08:00-09:00", 1).await;

    let got = s.find_available("math", Some("2026-10-20")).await.unwrap();
    assert_eq!(ids(&got), vec![am.id, pm.id]);
}

#[tokio::test]
async fn find_available_rejects_bad_input() {
    let (s, _) = scheduler_at("available_bad_input.wal", at("2026-10-18", "08:00"));
    assert!(matches!(
        s.find_available("", None).await,
        Err(SchedulerError::Validation(_))
    ));
    assert!(matches!(
        s.find_available("math", Some("tomorrow")).await,
        Err(SchedulerError::Validation(_))
    ));
}

#[tokio::test]
async fn find_by_owner_is_full_history_and_idempotent() {
    let (s, _) = scheduler_at("by_owner.wal", at("2026-10-18", "12:00"));
    let past = publish(&s, "math", "2026-10-01", "09:00-10:00", 1).await;
    let am = publish(&s, "art", "2026-10-25", "08:00-09:00", 1).await;
    let pm = publish(&s, "math", "2026-10-25", "13:00-14:00", 1).await;
    let other = Caller::mentor("mentor-2", "Rafi", "");
    s.publish(&other, request("math", "2026-10-25", "10:00-11:00", 1))
        .await
        .unwrap();

    let first = s.find_by_owner("mentor-1").await.unwrap();
    assert_eq!(ids(&first), vec![am.id, pm.id, past.id]);
    let second = s.find_by_owner("mentor-1").await.unwrap();
    assert_eq!(first, second);
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_last_seat() {
    let (s, _) = scheduler_at("e2e_last_seat.wal", at("2026-10-18", "08:00"));
    let slot = publish(&s, "math", "2026-10-18", "09:00-10:00", 1).await;

    let a = s.book(&student(1), slot.id).await.unwrap();
    assert_eq!(a.slot_id, slot.id);
    assert_eq!(a.status, BookingStatus::Confirmed);
    assert_eq!(a.room_id, slot.room_id);

    let owned = s.find_by_owner("mentor-1").await.unwrap();
    assert_eq!(owned[0].current_occupants, 1);
    assert!(!owned[0].is_available);

    assert!(matches!(
        s.book(&student(2), slot.id).await,
        Err(SchedulerError::CapacityExceeded(id)) if id == slot.id
    ));
    assert!(s.find_available("math", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn end_to_end_yesterday_and_tomorrow() {
    let (s, _) = scheduler_at("e2e_physics.wal", at("2026-10-18", "08:00"));
    publish(&s, "physics", "2026-10-17", "09:00-10:00", 2).await;
    let tomorrow = publish(&s, "physics", "2026-10-19", "09:00-10:00", 2).await;

    let got = s.find_available("physics", None).await.unwrap();
    assert_eq!(ids(&got), vec![tomorrow.id]);
}

#[tokio::test]
async fn flag_tracks_occupancy_after_every_booking() {
    let (s, _) = scheduler_at("flag_tracking.wal", at("2026-10-18", "08:00"));
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 3).await;
    for n in 0..3 {
        s.book(&student(n), slot.id).await.unwrap();
        let current = &s.find_by_owner("mentor-1").await.unwrap()[0];
        assert_eq!(current.current_occupants, n + 1);
        assert!(current.is_consistent());
    }
    assert!(!s.find_by_owner("mentor-1").await.unwrap()[0].is_available);
}

#[tokio::test]
async fn book_unknown_slot() {
    let (s, _) = scheduler_at("book_unknown.wal", at("2026-10-18", "08:00"));
    let missing = Ulid::new();
    assert!(matches!(
        s.book(&student(1), missing).await,
        Err(SchedulerError::NotFound(id)) if id == missing
    ));
}

#[tokio::test]
async fn book_requires_student_role() {
    let (s, _) = scheduler_at("book_role.wal", at("2026-10-18", "08:00"));
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 1).await;
    assert!(matches!(
        s.book(&mentor(), slot.id).await,
        Err(SchedulerError::Forbidden(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_never_exceed_capacity() {
    let (s, _) = scheduler_at("concurrent_book.wal", at("2026-10-18", "08:00"));
    let s = Arc::new(s);
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 3).await;

    let mut handles = Vec::new();
    for n in 0..24 {
        let s = s.clone();
        let slot_id = slot.id;
        handles.push(tokio::spawn(async move { s.book(&student(n), slot_id).await }));
    }
    let mut confirmed = 0u32;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(SchedulerError::CapacityExceeded(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let after = &s.find_by_owner("mentor-1").await.unwrap()[0];
    assert_eq!(confirmed, 3);
    assert_eq!(after.current_occupants, 3);
    assert!(!after.is_available);
    assert!(after.is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn every_seat_is_taken_when_students_match_capacity() {
    let (s, _) = scheduler_at("concurrent_exact.wal", at("2026-10-18", "08:00"));
    let s = Arc::new(s);
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 32).await;

    let mut handles = Vec::new();
    for n in 0..32 {
        let s = s.clone();
        let slot_id = slot.id;
        handles.push(tokio::spawn(async move { s.book(&student(n), slot_id).await }));
    }
    for h in handles {
        if let Err(e) = h.await.unwrap() {
            panic!("seat refused while seats remained: {e}");
        }
    }

    let after = &s.find_by_owner("mentor-1").await.unwrap()[0];
    assert_eq!(after.current_occupants, 32);
    assert!(!after.is_available);
    assert_eq!(s.list_by_student("stu-31").await.unwrap().len(), 1);
}

/// Wraps a real store and fails the first `conflicts` booking commits with a
/// version conflict.
struct ConflictingStore {
    inner: WalStore,
    conflicts: AtomicU32,
    commits_attempted: AtomicU32,
}

impl ConflictingStore {
    fn new(name: &str, conflicts: u32) -> Self {
        Self {
            inner: WalStore::open(&test_wal_path(name)).unwrap(),
            conflicts: AtomicU32::new(conflicts),
            commits_attempted: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CollectionStore for ConflictingStore {
    async fn insert_slot(&self, slot: Slot) -> Result<(), StoreError> {
        CollectionStore::insert_slot(&self.inner, slot).await
    }

    async fn get_slot(&self, id: SlotId) -> Result<Option<Versioned<Slot>>, StoreError> {
        CollectionStore::get_slot(&self.inner, id).await
    }

    async fn query_slots(
        &self,
        filter: &SlotFilter,
        order: SlotOrder,
    ) -> Result<Vec<Slot>, StoreError> {
        CollectionStore::query_slots(&self.inner, filter, order).await
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        CollectionStore::get_booking(&self.inner, id).await
    }

    async fn bookings_by_student(&self, student_id: &str) -> Result<Vec<Booking>, StoreError> {
        CollectionStore::bookings_by_student(&self.inner, student_id).await
    }

    async fn commit_booking(
        &self,
        booking: Booking,
        update: OccupancyUpdate,
    ) -> Result<(), StoreError> {
        self.commits_attempted.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict(update.slot_id));
        }
        CollectionStore::commit_booking(&self.inner, booking, update).await
    }

    async fn commit_cancellation(
        &self,
        booking_id: BookingId,
        update: OccupancyUpdate,
    ) -> Result<(), StoreError> {
        CollectionStore::commit_cancellation(&self.inner, booking_id, update).await
    }
}

#[tokio::test]
async fn conflict_is_retried_then_succeeds() {
    let store = Arc::new(ConflictingStore::new("conflict_retry.wal", 2));
    let s = Scheduler::new(store.clone())
        .with_clock(Arc::new(FixedClock::new(at("2026-10-18", "08:00"))));
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 1).await;

    let booking = s.book(&student(1), slot.id).await.unwrap();
    assert_eq!(store.commits_attempted.load(Ordering::SeqCst), 3);
    assert_eq!(
        s.list_by_student("stu-1").await.unwrap(),
        vec![booking]
    );
}

#[tokio::test]
async fn persistent_conflict_on_open_slot_is_retryable() {
    let store = Arc::new(ConflictingStore::new("conflict_exhausted.wal", u32::MAX));
    let s = Scheduler::new(store.clone())
        .with_clock(Arc::new(FixedClock::new(at("2026-10-18", "08:00"))))
        .with_options(SchedulerOptions {
            max_commit_attempts: 4,
            ..Default::default()
        });
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 2).await;

    match s.book(&student(1), slot.id).await {
        Err(e @ SchedulerError::StoreUnavailable(_)) => assert!(e.is_retryable()),
        other => panic!("expected StoreUnavailable, got {other:?}"),
    }
    // Configured attempts plus one per seat.
    assert_eq!(store.commits_attempted.load(Ordering::SeqCst), 6);
    assert!(s.list_by_student("stu-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn slot_filled_between_read_and_commit_is_capacity_exceeded() {
    let store = Arc::new(ConflictingStore::new("filled_before_commit.wal", 0));
    let s = Scheduler::new(store.clone())
        .with_clock(Arc::new(FixedClock::new(at("2026-10-18", "08:00"))));
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 1).await;
    let stale = store.get_slot(slot.id).await.unwrap().unwrap();
    s.book(&student(1), slot.id).await.unwrap();

    let late = Booking::snapshot(Ulid::new(), &stale.doc, &student(2), 0);
    let result = store
        .commit_booking(
            late,
            OccupancyUpdate {
                slot_id: slot.id,
                expected_version: stale.version,
                occupancy: Occupancy::for_capacity(1, 1),
            },
        )
        .await;
    assert!(matches!(
        result.map_err(SchedulerError::from),
        Err(SchedulerError::CapacityExceeded(id)) if id == slot.id
    ));
}

/// Every call fails as if the network were down.
struct UnreachableStore;

fn unreachable() -> StoreError {
    StoreError::Unavailable("connection refused".into())
}

#[async_trait]
impl CollectionStore for UnreachableStore {
    async fn insert_slot(&self, _slot: Slot) -> Result<(), StoreError> {
        Err(unreachable())
    }

    async fn get_slot(&self, _id: SlotId) -> Result<Option<Versioned<Slot>>, StoreError> {
        Err(unreachable())
    }

    async fn query_slots(
        &self,
        _filter: &SlotFilter,
        _order: SlotOrder,
    ) -> Result<Vec<Slot>, StoreError> {
        Err(unreachable())
    }

    async fn get_booking(&self, _id: BookingId) -> Result<Option<Booking>, StoreError> {
        Err(unreachable())
    }

    async fn bookings_by_student(&self, _student_id: &str) -> Result<Vec<Booking>, StoreError> {
        Err(unreachable())
    }

    async fn commit_booking(
        &self,
        _booking: Booking,
        _update: OccupancyUpdate,
    ) -> Result<(), StoreError> {
        Err(unreachable())
    }

    async fn commit_cancellation(
        &self,
        _booking_id: BookingId,
        _update: OccupancyUpdate,
    ) -> Result<(), StoreError> {
        Err(unreachable())
    }
}

#[tokio::test]
async fn store_failures_surface_as_store_unavailable() {
    let s = Scheduler::new(Arc::new(UnreachableStore));
    let cases = [
        s.book(&student(1), Ulid::new()).await.map(|_| ()),
        s.find_available("math", None).await.map(|_| ()),
        s.find_by_owner("mentor-1").await.map(|_| ()),
        s.list_by_student("stu-1").await.map(|_| ()),
        s.publish(&mentor(), request("math", "2026-10-20", "09:00-10:00", 1))
            .await
            .map(|_| ()),
    ];
    for result in cases {
        match result {
            Err(e @ SchedulerError::StoreUnavailable(_)) => {
                assert!(e.is_retryable());
                assert_eq!(e.sqlstate(), "58000");
            }
            other => panic!("expected StoreUnavailable, got {other:?}"),
        }
    }
}

// ── Listing, summary, cancellation ───────────────────────

#[tokio::test]
async fn list_by_student_newest_date_first() {
    let (s, _) = scheduler_at("list_student.wal", at("2026-10-18", "08:00"));
    let a = publish(&s, "math", "2026-10-20", "13:00-14:00", 2).await;
    let b = publish(&s, "art", "2026-10-22", "09:00-10:00", 2).await;
    let c = publish(&s, "math", "2026-10-20", "08:00-09:00", 2).await;
    let ba = s.book(&student(1), a.id).await.unwrap();
    let bb = s.book(&student(1), b.id).await.unwrap();
    let bc = s.book(&student(1), c.id).await.unwrap();
    s.book(&student(2), a.id).await.unwrap();

    let got: Vec<BookingId> = s
        .list_by_student("stu-1")
        .await
        .unwrap()
        .iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(got, vec![bb.id, bc.id, ba.id]);
}

#[tokio::test]
async fn student_summary_counts_live_sessions() {
    let (s, clock) = scheduler_at("summary.wal", at("2026-10-18", "08:00"));
    let now_slot = publish(&s, "math", "2026-10-18", "09:00-10:00", 2).await;
    let later = publish(&s, "math", "2026-10-19", "09:00-10:00", 2).await;
    let dropped = publish(&s, "art", "2026-10-20", "09:00-10:00", 2).await;
    s.book(&student(1), now_slot.id).await.unwrap();
    s.book(&student(1), later.id).await.unwrap();
    let cancelled = s.book(&student(1), dropped.id).await.unwrap();
    s.cancel(&student(1), cancelled.id).await.unwrap();

    clock.set(at("2026-10-18", "09:30"));
    let summary = s.student_summary("stu-1").await.unwrap();
    assert_eq!(
        summary,
        StudentSummary {
            total: 3,
            confirmed: 2,
            completed: 0,
            live_now: 1,
        }
    );
}

#[tokio::test]
async fn cancel_rolls_back_occupancy() {
    let (s, _) = scheduler_at("cancel_rollback.wal", at("2026-10-18", "08:00"));
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 1).await;
    let booking = s.book(&student(1), slot.id).await.unwrap();
    assert!(s.find_available("math", None).await.unwrap().is_empty());

    let cancelled = s.cancel(&student(1), booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let reopened = s.find_available("math", None).await.unwrap();
    assert_eq!(ids(&reopened), vec![slot.id]);
    assert_eq!(reopened[0].current_occupants, 0);
    assert!(reopened[0].is_consistent());

    // The freed seat is bookable again.
    s.book(&student(2), slot.id).await.unwrap();
    let listed = s.list_by_student("stu-1").await.unwrap();
    assert_eq!(listed[0].status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn cancel_rules() {
    let (s, _) = scheduler_at("cancel_rules.wal", at("2026-10-18", "08:00"));
    let slot = publish(&s, "math", "2026-10-20", "09:00-10:00", 2).await;
    let booking = s.book(&student(1), slot.id).await.unwrap();

    assert!(matches!(
        s.cancel(&student(2), booking.id).await,
        Err(SchedulerError::Forbidden(_))
    ));
    assert!(matches!(
        s.cancel(&mentor(), booking.id).await,
        Err(SchedulerError::Forbidden(_))
    ));
    let missing = Ulid::new();
    assert!(matches!(
        s.cancel(&student(1), missing).await,
        Err(SchedulerError::BookingNotFound(id)) if id == missing
    ));

    s.cancel(&student(1), booking.id).await.unwrap();
    assert!(matches!(
        s.cancel(&student(1), booking.id).await,
        Err(SchedulerError::InvalidTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::Cancelled,
        })
    ));
    assert_eq!(s.find_by_owner("mentor-1").await.unwrap()[0].current_occupants, 0);
}

// ── Overlap policy ───────────────────────────────────────

#[tokio::test]
async fn overlaps_allowed_by_default() {
    let (s, _) = scheduler_at("overlap_default.wal", at("2026-10-18", "08:00"));
    let a = publish(&s, "math", "2026-10-20", "09:00-10:00", 2).await;
    publish(&s, "art", "2026-10-20", "09:30-10:30", 2).await;
    s.book(&student(1), a.id).await.unwrap();
    s.book(&student(1), a.id).await.unwrap();
}

#[tokio::test]
async fn reject_overlaps_for_mentor() {
    let (s, _) = scheduler_at("overlap_mentor.wal", at("2026-10-18", "08:00"));
    let s = s.with_policy(Arc::new(RejectOverlaps));
    publish(&s, "math", "2026-10-20", "09:00-10:00", 2).await;

    assert!(matches!(
        s.publish(&mentor(), request("art", "2026-10-20", "09:30-10:30", 1)).await,
        Err(SchedulerError::Overlap(_))
    ));
    // Back-to-back windows, another date, or another mentor are fine.
    publish(&s, "art", "2026-10-20", "10:00-11:00", 1).await;
    publish(&s, "art", "2026-10-21", "09:30-10:30", 1).await;
    let other = Caller::mentor("mentor-2", "Rafi", "");
    s.publish(&other, request("art", "2026-10-20", "09:30-10:30", 1))
        .await
        .unwrap();
}

#[tokio::test]
async fn reject_overlaps_for_student() {
    let (s, _) = scheduler_at("overlap_student.wal", at("2026-10-18", "08:00"));
    let s = s.with_policy(Arc::new(RejectOverlaps));
    let a = publish(&s, "math", "2026-10-20", "09:00-10:00", 3).await;
    let other = Caller::mentor("mentor-2", "Rafi", "");
    let b = s
        .publish(&other, request("art", "2026-10-20", "09:30-10:30", 3))
        .await
        .unwrap();

    let first = s.book(&student(1), a.id).await.unwrap();
    assert!(matches!(
        s.book(&student(1), a.id).await,
        Err(SchedulerError::Overlap(_))
    ));
    assert!(matches!(
        s.book(&student(1), b.id).await,
        Err(SchedulerError::Overlap(_))
    ));
    s.book(&student(2), b.id).await.unwrap();

    // A cancelled booking no longer blocks.
    s.cancel(&student(1), first.id).await.unwrap();
    s.book(&student(1), b.id).await.unwrap();
}

#[test]
fn sqlstates_distinguish_full_from_failure() {
    let id = Ulid::new();
    assert_eq!(SchedulerError::CapacityExceeded(id).sqlstate(), "53400");
    assert_eq!(SchedulerError::NotFound(id).sqlstate(), "P0002");
    assert_ne!(
        SchedulerError::CapacityExceeded(id).sqlstate(),
        SchedulerError::StoreUnavailable("x".into()).sqlstate()
    );
    assert!(!SchedulerError::CapacityExceeded(id).is_retryable());
}

#[test]
fn store_errors_map_to_scheduler_errors() {
    let id = Ulid::new();
    assert!(matches!(
        SchedulerError::from(StoreError::NotFound(id)),
        SchedulerError::NotFound(x) if x == id
    ));
    assert!(matches!(
        SchedulerError::from(StoreError::Full(id)),
        SchedulerError::CapacityExceeded(x) if x == id
    ));
    assert!(matches!(
        SchedulerError::from(StoreError::LimitExceeded("too many slots")),
        SchedulerError::Validation(_)
    ));
    assert!(matches!(
        SchedulerError::from(StoreError::Unavailable("disk full".into())),
        SchedulerError::StoreUnavailable(_)
    ));
}
