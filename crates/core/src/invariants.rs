//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use crate::models::{is_valid_room_id, Role, RoomRecord, SessionContext, MAX_NAMES};
use crate::spin::{SpinOrigin, SpinPhase};

/// Validate a room record before it is written
pub fn assert_record_invariants(record: &RoomRecord) {
    debug_assert!(
        record.names.len() <= MAX_NAMES,
        "Room record carries {} names, cap is {}",
        record.names.len(),
        MAX_NAMES
    );

    debug_assert!(
        record.current_rotation.is_finite(),
        "Room record has non-finite rotation {}",
        record.current_rotation
    );

    debug_assert!(
        record.last_update >= record.created_at,
        "Room record updated ({}) before it was created ({})",
        record.last_update,
        record.created_at
    );
}

/// Validate that role, connection and room id agree
pub fn assert_session_invariants(ctx: &SessionContext) {
    // A room role implies a room
    debug_assert!(
        ctx.role == Role::Unconnected || ctx.room_id.is_some(),
        "Session {} is {:?} without a room",
        ctx.session_id,
        ctx.role
    );

    if let Some(room_id) = &ctx.room_id {
        debug_assert!(
            is_valid_room_id(room_id.as_str()),
            "Session {} holds malformed room id {}",
            ctx.session_id,
            room_id
        );
    }

    // Viewers never run a locally-owned spin
    debug_assert!(
        ctx.role != Role::Viewer
            || !matches!(
                ctx.spin.phase(),
                SpinPhase::Spinning {
                    origin: SpinOrigin::Local,
                    ..
                }
            ),
        "Viewer session {} is running a local spin",
        ctx.session_id
    );

    debug_assert!(
        ctx.wheel.current_rotation.is_finite(),
        "Session {} has non-finite rotation",
        ctx.session_id
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoomId;

    #[test]
    fn test_valid_record() {
        let record = RoomRecord::new(10);
        assert_record_invariants(&record);
    }

    #[test]
    fn test_valid_session() {
        let mut ctx = SessionContext::new(true);
        assert_session_invariants(&ctx);

        ctx.enter_room(RoomId::parse("ROOM42").unwrap(), Role::Viewer);
        assert_session_invariants(&ctx);
    }

    #[test]
    #[should_panic(expected = "cap is 100")]
    fn test_oversized_record_panics() {
        let mut record = RoomRecord::new(0);
        record.names = (0..=MAX_NAMES).map(|i| i.to_string()).collect();
        assert_record_invariants(&record);
    }

    #[test]
    #[should_panic(expected = "without a room")]
    fn test_host_without_room_panics() {
        let mut ctx = SessionContext::new(true);
        ctx.role = Role::Host;
        assert_session_invariants(&ctx);
    }
}
