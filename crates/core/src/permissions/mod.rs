//! Permission system for wheel operations

use crate::models::Role;

/// Actions a session can attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelAction {
    // Editing the wheel
    AddName,
    RemoveName,
    Shuffle,
    ClearAll,
    AdjustIntensity,
    Spin,

    // Rooms
    CreateRoom,
    JoinRoom,
    CopyRoomId,

    // Store writes
    PushState,
    BroadcastSpin,
    ClearRoom,
    ReassertViewers,
    IncrementViewers,
}

/// Permission matrix for session roles
pub struct PermissionMatrix;

impl PermissionMatrix {
    /// Check if a role may perform an action
    pub fn can_perform(role: Role, action: WheelAction) -> bool {
        match action {
            // Local edits - everyone but viewers
            WheelAction::AddName
            | WheelAction::RemoveName
            | WheelAction::Shuffle
            | WheelAction::ClearAll
            | WheelAction::AdjustIntensity
            | WheelAction::Spin => role != Role::Viewer,

            // Anyone may switch rooms
            WheelAction::CreateRoom | WheelAction::JoinRoom => true,

            // Needs a room to copy
            WheelAction::CopyRoomId => role != Role::Unconnected,

            // Wheel state in the store - host only
            WheelAction::PushState
            | WheelAction::BroadcastSpin
            | WheelAction::ClearRoom
            | WheelAction::ReassertViewers => role == Role::Host,

            // A viewer announces itself
            WheelAction::IncrementViewers => role == Role::Viewer,
        }
    }
}
