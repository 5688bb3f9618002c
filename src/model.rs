use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::conference::RoomId;

/// Unix milliseconds.
pub type Ms = i64;

pub type SlotId = Ulid;
pub type BookingId = Ulid;

/// How far ahead, in hours, a session counts as "upcoming" rather than merely scheduled.
pub const UPCOMING_HORIZON_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("date must be YYYY-MM-DD, got {0:?}")]
    Date(String),
    #[error("time slot must be HH:MM-HH:MM, got {0:?}")]
    TimeSlot(String),
    #[error("time slot must start before it ends, got {0:?}")]
    EmptyWindow(String),
    #[error("unknown booking status {0:?}")]
    Status(String),
}

// ── Wire-level date and time ─────────────────────────────────────

/// Calendar date without offset, rendered exactly as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotDate(NaiveDate);

impl SlotDate {
    pub fn parse(s: &str) -> Result<Self, FormatError> {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| FormatError::Date(s.to_string()))?;
        let parsed = Self(date);
        // chrono accepts unpadded fields ("2026-1-5"); the wire format does not.
        if parsed.to_string() != s {
            return Err(FormatError::Date(s.to_string()));
        }
        Ok(parsed)
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for SlotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for SlotDate {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Minute of the day on a 24-hour clock, rendered `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self((hour * 60 + minute) as u16))
    }

    /// Parse a zero-padded `HH:MM`.
    pub fn parse(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() != 5 || b[2] != b':' {
            return None;
        }
        let digits = [b[0], b[1], b[3], b[4]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let hour = u32::from(b[0] - b'0') * 10 + u32::from(b[1] - b'0');
        let minute = u32::from(b[3] - b'0') * 10 + u32::from(b[4] - b'0');
        Self::new(hour, minute)
    }

    /// Truncates seconds: 09:00:59 is still 09:00.
    pub fn of(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }

    pub fn hour(self) -> u32 {
        u32::from(self.0 / 60)
    }

    pub fn minute(self) -> u32 {
        u32::from(self.0 % 60)
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Start and end clock times, `HH:MM-HH:MM`. The derived ordering (start, then
/// end) matches lexicographic ordering of the rendered string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeWindow {
    start: ClockTime,
    end: ClockTime,
}

impl TimeWindow {
    pub fn new(start: ClockTime, end: ClockTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn parse(s: &str) -> Result<Self, FormatError> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| FormatError::TimeSlot(s.to_string()))?;
        let start = ClockTime::parse(start).ok_or_else(|| FormatError::TimeSlot(s.to_string()))?;
        let end = ClockTime::parse(end).ok_or_else(|| FormatError::TimeSlot(s.to_string()))?;
        Self::new(start, end).ok_or_else(|| FormatError::EmptyWindow(s.to_string()))
    }

    pub fn start(&self) -> ClockTime {
        self.start
    }

    pub fn end(&self) -> ClockTime {
        self.end
    }

    /// Half-open overlap: `09:00-10:00` and `10:00-11:00` do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Where `now` falls relative to this window on `date`.
    pub fn phase_at(&self, date: SlotDate, now: NaiveDateTime) -> SessionPhase {
        let start = date.naive().and_time(self.start.to_naive());
        let end = date.naive().and_time(self.end.to_naive());
        if now < start {
            if start - now <= TimeDelta::hours(UPCOMING_HORIZON_HOURS) {
                SessionPhase::Upcoming
            } else {
                SessionPhase::Scheduled
            }
        } else if now <= end {
            SessionPhase::Live
        } else {
            SessionPhase::Ended
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for TimeWindow {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TimeWindow {
    type Error = FormatError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TimeWindow> for String {
    fn from(w: TimeWindow) -> Self {
        w.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Starts more than [`UPCOMING_HORIZON_HOURS`] from now.
    Scheduled,
    /// Starts within [`UPCOMING_HORIZON_HOURS`].
    Upcoming,
    Live,
    Ended,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Scheduled => "scheduled",
            SessionPhase::Upcoming => "upcoming",
            SessionPhase::Live => "live",
            SessionPhase::Ended => "ended",
        }
    }
}

// ── Identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Mentor,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Mentor => "mentor",
            Role::Student => "student",
        })
    }
}

/// The acting party as vouched for by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl Caller {
    pub fn mentor(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self::with_role(id, name, email, Role::Mentor)
    }

    pub fn student(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self::with_role(id, name, email, Role::Student)
    }

    fn with_role(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            role,
        }
    }
}

// ── Documents ────────────────────────────────────────────────────

/// Occupancy is always written as a pair so the availability flag can never
/// drift from the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub current_occupants: u32,
    pub is_available: bool,
}

impl Occupancy {
    pub fn for_capacity(current_occupants: u32, max_occupants: u32) -> Self {
        Self {
            current_occupants,
            is_available: current_occupants < max_occupants,
        }
    }
}

/// A mentor-published block of teaching time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub mentor_id: String,
    pub mentor_name: String,
    pub mentor_email: String,
    pub subject: String,
    pub date: SlotDate,
    pub time_slot: TimeWindow,
    pub max_occupants: u32,
    pub current_occupants: u32,
    pub is_available: bool,
    pub room_id: RoomId,
    pub description: Option<String>,
    pub created_at: Ms,
}

impl Slot {
    pub fn has_capacity(&self) -> bool {
        self.current_occupants < self.max_occupants
    }

    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            current_occupants: self.current_occupants,
            is_available: self.is_available,
        }
    }

    pub fn set_occupancy(&mut self, occupancy: Occupancy) {
        self.current_occupants = occupancy.current_occupants;
        self.is_available = occupancy.is_available;
    }

    /// `0 <= current <= max` and the flag agrees with the counter.
    pub fn is_consistent(&self) -> bool {
        self.current_occupants <= self.max_occupants
            && self.is_available == (self.current_occupants < self.max_occupants)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Holds a seat on its slot.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(FormatError::Status(other.to_string())),
        }
    }
}

/// A student's reservation. The mentor, subject, date, window and room fields
/// are copied from the slot at booking time and never re-synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub slot_id: SlotId,
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub mentor_id: String,
    pub subject: String,
    pub date: SlotDate,
    pub time_slot: TimeWindow,
    pub room_id: RoomId,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl Booking {
    pub fn snapshot(id: BookingId, slot: &Slot, student: &Caller, now: Ms) -> Self {
        Self {
            id,
            slot_id: slot.id,
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            student_email: student.email.clone(),
            mentor_id: slot.mentor_id.clone(),
            subject: slot.subject.clone(),
            date: slot.date,
            time_slot: slot.time_slot,
            room_id: slot.room_id.clone(),
            status: BookingStatus::Confirmed,
            created_at: now,
        }
    }

    pub fn phase_at(&self, now: NaiveDateTime) -> SessionPhase {
        self.time_slot.phase_at(self.date, now)
    }
}

/// The WAL record format. Occupancy is carried as an absolute value so
/// replaying a record is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotPublished {
        slot: Slot,
    },
    /// Booking insert and occupancy increment in one record.
    BookingCommitted {
        booking: Booking,
        occupancy: Occupancy,
    },
    BookingCancelled {
        booking_id: BookingId,
        slot_id: SlotId,
        occupancy: Occupancy,
    },
}

impl Event {
    pub fn slot_id(&self) -> SlotId {
        match self {
            Event::SlotPublished { slot } => slot.id,
            Event::BookingCommitted { booking, .. } => booking.slot_id,
            Event::BookingCancelled { slot_id, .. } => *slot_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StudentSummary {
    pub total: usize,
    pub confirmed: usize,
    pub completed: usize,
    /// Confirmed bookings whose session is running right now.
    pub live_now: usize,
}
