//! Room identifiers
//!
//! Six uppercase alphanumeric characters, typed in by viewers to join.

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const ROOM_ID_LEN: usize = 6;
pub const ROOM_ID_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Check a candidate room id without allocating
pub fn is_valid_room_id(value: &str) -> bool {
    value.len() == ROOM_ID_LEN && value.chars().all(|ch| ROOM_ID_ALPHABET.contains(ch))
}

/// A validated room id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(value: &str) -> Result<Self, RoomIdError> {
        let found = value.chars().count();
        if found != ROOM_ID_LEN {
            return Err(RoomIdError::InvalidLength {
                expected: ROOM_ID_LEN,
                found,
            });
        }
        for (index, ch) in value.chars().enumerate() {
            if !ROOM_ID_ALPHABET.contains(ch) {
                return Err(RoomIdError::InvalidCharacter { ch, index });
            }
        }
        Ok(Self(value.to_string()))
    }

    /// Normalize user input (trim, uppercase) before parsing
    pub fn from_user_input(value: &str) -> Result<Self, RoomIdError> {
        Self::parse(&value.trim().to_uppercase())
    }

    /// Generate a fresh id. Uniqueness is left to probability.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let alphabet = ROOM_ID_ALPHABET.as_bytes();
        let id = (0..ROOM_ID_LEN)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomIdError {
    #[error("room id must be {expected} characters, got {found}")]
    InvalidLength { expected: usize, found: usize },

    #[error("invalid character '{ch}' at position {index}")]
    InvalidCharacter { ch: char, index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_room_id("ABC123"));
        assert!(is_valid_room_id("ZZZZZZ"));
        assert!(RoomId::parse("000000").is_ok());
    }

    #[test]
    fn test_invalid_ids() {
        assert!(!is_valid_room_id("abc123"));
        assert!(!is_valid_room_id("ABC12"));
        assert!(!is_valid_room_id("ABC1234"));
        assert!(!is_valid_room_id("ABC-12"));

        assert_eq!(
            RoomId::parse("ABC12"),
            Err(RoomIdError::InvalidLength {
                expected: 6,
                found: 5
            })
        );
        assert_eq!(
            RoomId::parse("ABc123"),
            Err(RoomIdError::InvalidCharacter { ch: 'c', index: 2 })
        );
    }

    #[test]
    fn test_user_input_is_normalized() {
        let id = RoomId::from_user_input("  abc123 ").unwrap();
        assert_eq!(id.as_str(), "ABC123");
    }

    #[test]
    fn test_generated_ids_are_valid() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let id = RoomId::generate(&mut rng);
            assert!(is_valid_room_id(id.as_str()), "bad id {id}");
        }
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let ok: RoomId = serde_json::from_str("\"QWE987\"").unwrap();
        assert_eq!(ok.as_str(), "QWE987");
        assert!(serde_json::from_str::<RoomId>("\"qwe987\"").is_err());
    }
}
