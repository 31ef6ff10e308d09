//! Room snapshot reconciliation
//!
//! The store delivers the whole room record on every change. Only the keys
//! we recognise are applied, and only when they have the expected type;
//! anything missing or malformed leaves the local value alone.

use serde_json::Value;

use crate::models::WheelState;

/// Typed view of the fields a room snapshot may carry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomSnapshot {
    pub names: Option<Vec<String>>,
    pub total_spins: Option<u64>,
    pub current_rotation: Option<f64>,
    pub winner: Option<String>,
    pub viewers: Option<u64>,
}

impl RoomSnapshot {
    /// Extract recognised fields from a raw store value
    pub fn from_value(value: &Value) -> Self {
        let Some(record) = value.as_object() else {
            return Self::default();
        };

        let names = record.get("names").and_then(|v| {
            v.as_array()?
                .iter()
                .map(|n| n.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        });

        Self {
            names,
            total_spins: record.get("totalSpins").and_then(Value::as_u64),
            current_rotation: record
                .get("currentRotation")
                .and_then(Value::as_f64)
                .filter(|r| r.is_finite()),
            winner: record
                .get("winner")
                .and_then(Value::as_str)
                .map(str::to_string),
            viewers: record.get("viewers").and_then(Value::as_u64),
        }
    }
}

/// Which local fields a snapshot changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateDiff {
    pub names: bool,
    pub total_spins: bool,
    pub rotation: bool,
    pub winner: bool,
    pub viewers: bool,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Apply a snapshot to the local cache and report what changed
pub fn reconcile(state: &mut WheelState, snapshot: &RoomSnapshot) -> StateDiff {
    let mut diff = StateDiff::default();

    if let Some(names) = &snapshot.names {
        if *names != state.names {
            state.names = names.clone();
            diff.names = true;
        }
    }
    if let Some(total) = snapshot.total_spins {
        if total != state.total_spins {
            state.total_spins = total;
            diff.total_spins = true;
        }
    }
    if let Some(rotation) = snapshot.current_rotation {
        if rotation != state.current_rotation {
            state.current_rotation = rotation;
            diff.rotation = true;
        }
    }
    if let Some(winner) = &snapshot.winner {
        if state.winner.as_ref() != Some(winner) {
            state.winner = Some(winner.clone());
            diff.winner = true;
        }
    }
    if let Some(viewers) = snapshot.viewers {
        if viewers != state.viewers {
            state.viewers = viewers;
            diff.viewers = true;
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_snapshot_applies() {
        let mut state = WheelState::default();
        let snapshot = RoomSnapshot::from_value(&json!({
            "names": ["Alice", "Bob"],
            "totalSpins": 4,
            "currentRotation": 1.25,
            "winner": "Bob",
            "viewers": 2,
            "createdAt": 1,
            "lastUpdate": 2,
        }));

        let diff = reconcile(&mut state, &snapshot);
        assert_eq!(
            diff,
            StateDiff {
                names: true,
                total_spins: true,
                rotation: true,
                winner: true,
                viewers: true,
            }
        );
        assert_eq!(state.names, vec!["Alice", "Bob"]);
        assert_eq!(state.total_spins, 4);
        assert_eq!(state.current_rotation, 1.25);
        assert_eq!(state.winner.as_deref(), Some("Bob"));
        assert_eq!(state.viewers, 2);
    }

    #[test]
    fn test_reapplying_is_idempotent() {
        let mut state = WheelState::default();
        let snapshot = RoomSnapshot::from_value(&json!({
            "names": ["X"],
            "totalSpins": 1,
            "currentRotation": 3.0,
        }));

        reconcile(&mut state, &snapshot);
        let after_first = state.clone();
        let diff = reconcile(&mut state, &snapshot);

        assert!(diff.is_empty());
        assert_eq!(state, after_first);
    }

    #[test]
    fn test_absent_fields_are_kept() {
        let mut state = WheelState {
            names: vec!["Keep".into()],
            total_spins: 9,
            current_rotation: 0.5,
            winner: Some("Keep".into()),
            viewers: 3,
        };
        let diff = reconcile(&mut state, &RoomSnapshot::from_value(&json!({ "viewers": 4 })));

        assert!(diff.viewers);
        assert!(!diff.names && !diff.winner);
        assert_eq!(state.names, vec!["Keep"]);
        assert_eq!(state.winner.as_deref(), Some("Keep"));
        assert_eq!(state.viewers, 4);
    }

    #[test]
    fn test_malformed_fields_are_ignored() {
        let snapshot = RoomSnapshot::from_value(&json!({
            "names": "not a list",
            "totalSpins": -1,
            "currentRotation": "fast",
            "winner": 7,
        }));
        assert_eq!(snapshot, RoomSnapshot::default());

        let mixed = RoomSnapshot::from_value(&json!({ "names": ["ok", 3] }));
        assert!(mixed.names.is_none());

        assert_eq!(RoomSnapshot::from_value(&Value::Null), RoomSnapshot::default());
    }

    #[test]
    fn test_empty_names_clear_local_list() {
        let mut state = WheelState {
            names: vec!["X".into(), "Y".into()],
            ..WheelState::default()
        };
        let diff = reconcile(&mut state, &RoomSnapshot::from_value(&json!({ "names": [] })));
        assert!(diff.names);
        assert!(state.names.is_empty());
    }
}
