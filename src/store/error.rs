use ulid::Ulid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(Ulid),
    #[error("document already exists: {0}")]
    AlreadyExists(Ulid),
    /// The document changed since the caller read it.
    #[error("write conflict on {0}: document changed since it was read")]
    Conflict(Ulid),
    /// Every seat on the slot is taken; no retry can change that.
    #[error("slot {0} has no seats left")]
    Full(Ulid),
    #[error("rejected write on {id}: {reason}")]
    Invariant { id: Ulid, reason: &'static str },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
