//! Per-session state: role, connection and the local mirror of the room

use uuid::Uuid;

use super::{Intensity, RoomId};
use crate::spin::SpinMachine;

/// What this session is allowed to do in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Owns the room and is its only writer
    Host,
    /// Mirrors the host and replays spins
    Viewer,
    /// Local mode, no room
    Unconnected,
}

impl Role {
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Host => "Hosting",
            Role::Viewer => "Watching",
            Role::Unconnected => "Local",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Connection to the room store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No store for the lifetime of the session
    Unavailable,
    /// Store reachable, not subscribed to a room
    Idle,
    /// Subscribed to a room
    Connected,
}

/// Local cache of the room's wheel fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WheelState {
    pub names: Vec<String>,
    pub total_spins: u64,
    pub current_rotation: f64,
    pub winner: Option<String>,
    pub viewers: u64,
}

/// Everything one session owns
#[derive(Debug)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub role: Role,
    pub status: ConnectionStatus,
    pub room_id: Option<RoomId>,
    pub wheel: WheelState,
    pub spin: SpinMachine,
    pub intensity: Intensity,
}

impl SessionContext {
    /// Fresh local session; `store_available` decides whether rooms are possible
    pub fn new(store_available: bool) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            role: Role::Unconnected,
            status: if store_available {
                ConnectionStatus::Idle
            } else {
                ConnectionStatus::Unavailable
            },
            room_id: None,
            wheel: WheelState::default(),
            spin: SpinMachine::new(),
            intensity: Intensity::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn store_available(&self) -> bool {
        self.status != ConnectionStatus::Unavailable
    }

    /// Enter a room with the given role
    pub fn enter_room(&mut self, room_id: RoomId, role: Role) {
        self.room_id = Some(room_id);
        self.role = role;
        self.status = ConnectionStatus::Connected;
    }

    /// Fall back to local mode, keeping the wheel as it is
    pub fn leave_room(&mut self) {
        self.room_id = None;
        self.role = Role::Unconnected;
        if self.store_available() {
            self.status = ConnectionStatus::Idle;
        }
    }
}
