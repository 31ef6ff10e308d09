//! Room store interface
//!
//! A hierarchical JSON key-value store addressed by `/`-separated paths.
//! Sessions depend only on this trait; `MemoryStore` and `RemoteStore`
//! implement it.

use std::future::Future;

use serde_json::{Map, Value};
use spinroom_core::is_valid_path_segment;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Operations a session needs from the room store
pub trait RoomStore: Clone + Send + Sync + 'static {
    /// Read the value at a path
    fn get(&self, path: &str) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Overwrite the value at a path; `null` removes it
    fn set(&self, path: &str, value: Value) -> impl Future<Output = Result<()>> + Send;

    /// Overwrite named children of a path; `null` fields are removed
    fn update(
        &self,
        path: &str,
        fields: Map<String, Value>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete the value at a path
    fn remove(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Atomic read-modify-write, retried on conflict.
    ///
    /// `apply` may run more than once and must be pure.
    fn transaction<F>(&self, path: &str, apply: F) -> impl Future<Output = Result<Value>> + Send
    where
        F: Fn(Option<Value>) -> Value + Send + 'static;

    /// Observe a path. The current value is delivered first, then the full
    /// value again on every change at or below the path.
    fn subscribe(&self, path: &str) -> impl Future<Output = Result<Subscription>> + Send;
}

/// Handle to a live subscription; dropping it unsubscribes
pub struct Subscription {
    path: String,
    rx: mpsc::UnboundedReceiver<Option<Value>>,
    on_cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new<C>(path: String, rx: mpsc::UnboundedReceiver<Option<Value>>, on_cancel: C) -> Self
    where
        C: FnOnce() + Send + Sync + 'static,
    {
        Self {
            path,
            rx,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next value. `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }

    /// Take a value that has already arrived, without waiting
    pub fn try_recv(&mut self) -> Option<Option<Value>> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving updates
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Split a path into segments, rejecting reserved characters
pub fn split_path(path: &str) -> Result<Vec<String>> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if !segments.iter().all(|s| is_valid_path_segment(s)) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Join a child key onto a path
pub fn child_path(path: &str, key: &str) -> String {
    let base = path.trim_end_matches('/');
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", base, key.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("rooms/ABC123").unwrap(), vec!["rooms", "ABC123"]);
        assert_eq!(split_path("/rooms//ABC123/").unwrap(), vec!["rooms", "ABC123"]);
        assert!(split_path("").unwrap().is_empty());
        assert!(split_path("rooms/a.b").is_err());
        assert!(split_path("rooms/$x").is_err());
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("rooms/ABC123", "spinEvent"), "rooms/ABC123/spinEvent");
        assert_eq!(child_path("rooms/", "X"), "rooms/X");
        assert_eq!(child_path("", "rooms"), "rooms");
    }

    #[test]
    fn test_drop_runs_cancel() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let (_tx, rx) = mpsc::unbounded_channel();

        let sub = Subscription::new("rooms".into(), rx, move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!cancelled.load(Ordering::SeqCst));
        sub.cancel();
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
