use crate::model::{BookingId, BookingStatus, FormatError, SlotId};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("slot not found: {0}")]
    NotFound(SlotId),
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),
    #[error("session is already full: {0}")]
    CapacityExceeded(SlotId),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("booking cannot move from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("overlapping session: {0}")]
    Overlap(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl SchedulerError {
    /// SQLSTATE reported to wire clients. "Full" and "something went wrong"
    /// must stay distinguishable.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SchedulerError::NotFound(_) | SchedulerError::BookingNotFound(_) => "P0002",
            SchedulerError::CapacityExceeded(_) => "53400",
            SchedulerError::Validation(_) => "22023",
            SchedulerError::Forbidden(_) => "42501",
            SchedulerError::InvalidTransition { .. } => "55000",
            SchedulerError::Overlap(_) => "23P01",
            SchedulerError::StoreUnavailable(_) => "58000",
        }
    }

    /// Whether the same request might succeed if simply repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::StoreUnavailable(_))
    }
}

impl From<StoreError> for SchedulerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SchedulerError::NotFound(id),
            StoreError::Full(id) => SchedulerError::CapacityExceeded(id),
            StoreError::LimitExceeded(msg) => SchedulerError::Validation(msg.to_string()),
            other => SchedulerError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<FormatError> for SchedulerError {
    fn from(e: FormatError) -> Self {
        SchedulerError::Validation(e.to_string())
    }
}
