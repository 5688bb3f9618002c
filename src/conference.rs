use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::Ms;

pub const DEFAULT_ROOM_PREFIX: &str = "tutorhub";
pub const DEFAULT_CONFERENCE_HOST: &str = "meet.jit.si";

const SUFFIX_LEN: usize = 7;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque conference room handle, `{prefix}-{unix_ms}-{suffix}`.
///
/// Unique with overwhelming probability but guessable; it grants nothing by
/// itself and must not be treated as a secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn generate(prefix: &str, now: Ms) -> Self {
        Self::generate_with(prefix, now, &mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(prefix: &str, now: Ms, rng: &mut R) -> Self {
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
            .collect();
        Self(format!("{prefix}-{now}-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Joinable URL on the conferencing service, `https://{host}/{room}`.
    pub fn join_url(&self, host: &str) -> String {
        format!("https://{}/{}", host.trim_end_matches('/'), self.0)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn room_id_layout() {
        let room = RoomId::generate("tutorhub", 1_760_000_000_000);
        let parts: Vec<&str> = room.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "tutorhub");
        assert_eq!(parts[1], "1760000000000");
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn room_ids_unique_within_same_millisecond() {
        let ids: HashSet<RoomId> = (0..1000).map(|_| RoomId::generate("x", 5)).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn join_url() {
        let room = RoomId("tutorhub-1-abcdefg".into());
        assert_eq!(room.join_url("meet.jit.si"), "https://meet.jit.si/tutorhub-1-abcdefg");
        assert_eq!(room.join_url("meet.example.org/"), "https://meet.example.org/tutorhub-1-abcdefg");
    }
}
