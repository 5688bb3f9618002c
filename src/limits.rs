//! Hard limits enforced at the store and scheduler boundaries.

/// Upper bound on `max_occupants` for a single slot.
pub const MAX_OCCUPANTS: u32 = 500;

pub const MAX_SLOTS_PER_TENANT: usize = 1_000_000;
pub const MAX_BOOKINGS_PER_TENANT: usize = 10_000_000;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_SUBJECT_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_ROOM_PREFIX_LEN: usize = 64;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 200;

/// Default number of optimistic attempts `book`/`cancel` make before giving up.
pub const DEFAULT_COMMIT_ATTEMPTS: u32 = 5;
pub const MAX_COMMIT_ATTEMPTS: u32 = 32;
