//! Spinroom Core Library
//!
//! Room model, wheel math, the spin state machine and snapshot
//! reconciliation. Nothing here touches the network or a clock.

pub mod config;
pub mod error;
pub mod invariants;
pub mod models;
pub mod permissions;
pub mod spin;
pub mod sync;
pub mod wheel;

pub use config::{AppConfig, StoreConfig, SyncConfig};
pub use error::{Error, Result};
pub use models::*;
pub use permissions::*;
pub use spin::{SpinFrame, SpinMachine, SpinOrigin, SpinPhase};
pub use sync::{reconcile, RoomSnapshot, StateDiff};
