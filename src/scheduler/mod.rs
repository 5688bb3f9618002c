//! Scheduling core: the availability query engine and the booking
//! transition manager, both written against [`CollectionStore`].

mod availability;
mod booking;
mod error;
mod policy;
#[cfg(test)]
mod tests;
mod validate;

pub use availability::is_still_bookable;
pub use error::SchedulerError;
pub use policy::{AllowOverlaps, OverlapPolicy, RejectOverlaps};
pub use validate::PublishRequest;

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::conference::DEFAULT_ROOM_PREFIX;
use crate::limits::{DEFAULT_COMMIT_ATTEMPTS, MAX_COMMIT_ATTEMPTS};
use crate::store::CollectionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Namespace prefix of generated conference room ids.
    pub room_prefix: String,
    /// Optimistic attempts `book` and `cancel` make before giving up on a
    /// contended slot.
    pub max_commit_attempts: u32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            room_prefix: DEFAULT_ROOM_PREFIX.to_string(),
            max_commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn CollectionStore>,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn OverlapPolicy>,
    options: SchedulerOptions,
}

impl Scheduler {
    /// System clock, no overlap rules, default options.
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            policy: Arc::new(AllowOverlaps),
            options: SchedulerOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn OverlapPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn attempts(&self) -> u32 {
        self.options.max_commit_attempts.clamp(1, MAX_COMMIT_ATTEMPTS)
    }
}
