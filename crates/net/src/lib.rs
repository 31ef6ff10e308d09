//! Spinroom Network Library
//!
//! The room store that hosts and viewers share.
//!
//! # Architecture
//!
//! - **RoomStore**: the path-addressed JSON store a session talks to
//! - **MemoryStore**: in-process tree with change notifications
//! - **StoreServer**: serves a `MemoryStore` over TCP
//! - **RemoteStore**: client for a `StoreServer`
//! - **Protocol**: Length-prefixed JSON requests and responses
//!
//! # Usage
//!
//! ```ignore
//! // Somewhere on the network
//! let server = StoreServer::start(7331).await?;
//!
//! // Each session
//! let store = RemoteStore::connect("wheel.lan:7331").await?;
//! let mut feed = store.subscribe("rooms/ABC123").await?;
//! while let Some(value) = feed.recv().await {
//!     // value is the whole room record, or None once deleted
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod memory;
pub mod protocol;
pub mod server;
pub mod store;

pub use client::RemoteStore;
pub use error::{Error, Result};
pub use memory::{CasOutcome, MemoryStore};
pub use protocol::{Request, Response};
pub use server::StoreServer;
pub use store::{child_path, split_path, RoomStore, Subscription};

/// Default port for store servers
pub const DEFAULT_PORT: u16 = 7331;
