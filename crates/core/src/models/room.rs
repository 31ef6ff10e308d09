//! Room record - the shared state of one wheel session

use serde::{Deserialize, Serialize};

use super::{RoomId, SpinMessage};

/// Upper bound on names pushed to the store
pub const MAX_NAMES: usize = 100;

/// Default parent path for room records in the store
pub const DEFAULT_ROOMS_PATH: &str = "rooms";

/// Key of the transient spin broadcast inside a room record
pub const SPIN_EVENT_KEY: &str = "spinEvent";

/// Key of the viewer counter inside a room record
pub const VIEWERS_KEY: &str = "viewers";

/// Characters a store path segment may not contain
pub const RESERVED_PATH_CHARS: &[char] = &['.', '#', '$', '[', ']'];

/// Whether a single store path segment is usable
pub fn is_valid_path_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(RESERVED_PATH_CHARS)
}

/// Check the name list against the write cap
pub fn is_within_capacity(names: &[String]) -> bool {
    names.len() <= MAX_NAMES
}

/// Store path of a room record
pub fn room_path(rooms_path: &str, room_id: &RoomId) -> String {
    format!("{}/{}", rooms_path.trim_end_matches('/'), room_id)
}

/// Full room record as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub total_spins: u64,
    #[serde(default)]
    pub current_rotation: f64,
    #[serde(default)]
    pub viewers: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    pub created_at: i64,
    pub last_update: i64,
    /// Present only while a spin is being broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spin_event: Option<SpinMessage>,
}

impl RoomRecord {
    /// A freshly created, empty room
    pub fn new(now_ms: i64) -> Self {
        Self {
            names: Vec::new(),
            total_spins: 0,
            current_rotation: 0.0,
            viewers: 0,
            winner: None,
            created_at: now_ms,
            last_update: now_ms,
            spin_event: None,
        }
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_shape() {
        let record = RoomRecord::new(1_700_000_000_000);
        let value = record.to_value().unwrap();

        assert_eq!(
            value,
            json!({
                "names": [],
                "totalSpins": 0,
                "currentRotation": 0.0,
                "viewers": 0,
                "createdAt": 1_700_000_000_000i64,
                "lastUpdate": 1_700_000_000_000i64,
            })
        );
    }

    #[test]
    fn test_capacity() {
        let names: Vec<String> = (0..MAX_NAMES).map(|i| format!("n{i}")).collect();
        assert!(is_within_capacity(&names));

        let mut over = names.clone();
        over.push("one too many".to_string());
        assert!(!is_within_capacity(&over));
    }

    #[test]
    fn test_path_segments() {
        assert!(is_valid_path_segment("rooms"));
        assert!(is_valid_path_segment("ABC123"));
        for bad in ["", "a.b", "a#b", "$x", "[0]", "x]"] {
            assert!(!is_valid_path_segment(bad), "{:?}", bad);
        }
    }

    #[test]
    fn test_room_path() {
        let id = RoomId::parse("ABC123").unwrap();
        assert_eq!(room_path("rooms", &id), "rooms/ABC123");
        assert_eq!(room_path("games/rooms/", &id), "games/rooms/ABC123");
    }
}
