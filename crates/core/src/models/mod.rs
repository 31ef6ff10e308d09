//! Data models for Spinroom

mod room;
mod room_id;
mod session;
mod spin;

pub use room::*;
pub use room_id::*;
pub use session::*;
pub use spin::*;
