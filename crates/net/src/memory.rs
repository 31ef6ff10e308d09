//! In-process room store
//!
//! Backs the store server and stands in for the remote store in tests.
//! The tree lock is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::store::{split_path, RoomStore, Subscription};

/// Result of a compare-and-set
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    Applied,
    /// Value at the path did not match; carries what is there now
    Conflict(Option<Value>),
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tree>>,
}

#[derive(Default)]
struct Tree {
    root: Map<String, Value>,
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
}

struct Subscriber {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<Option<Value>>,
    last: Option<Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write only if the current value equals `expected`
    pub fn compare_and_set(
        &self,
        path: &str,
        expected: Option<&Value>,
        value: Value,
    ) -> Result<CasOutcome> {
        let segments = writable_path(path)?;
        let mut tree = self.tree();
        let current = read_at(&tree.root, &segments);
        if current.as_ref() != expected {
            return Ok(CasOutcome::Conflict(current));
        }
        tree.write(&segments, value);
        tree.notify(&segments);
        Ok(CasOutcome::Applied)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tree().subscribers.len()
    }

    fn read(&self, path: &str) -> Result<Option<Value>> {
        let segments = split_path(path)?;
        Ok(read_at(&self.tree().root, &segments))
    }

    fn write(&self, path: &str, value: Value) -> Result<()> {
        let segments = writable_path(path)?;
        let mut tree = self.tree();
        tree.write(&segments, value);
        tree.notify(&segments);
        Ok(())
    }

    fn write_fields(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let base = split_path(path)?;
        let mut children = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            let mut segments = base.clone();
            segments.extend(split_path(&key)?);
            if segments.is_empty() {
                return Err(Error::InvalidPath(key));
            }
            children.push((segments, value));
        }

        let mut tree = self.tree();
        for (segments, value) in children {
            tree.write(&segments, value);
        }
        // Every child is below `base`, so one pass reaches all observers
        tree.notify(&base);
        Ok(())
    }

    fn read_modify_write<F>(&self, path: &str, apply: F) -> Result<Value>
    where
        F: Fn(Option<Value>) -> Value,
    {
        let segments = writable_path(path)?;
        let mut tree = self.tree();
        let next = apply(read_at(&tree.root, &segments));
        tree.write(&segments, next.clone());
        tree.notify(&segments);
        Ok(next)
    }

    fn add_subscriber(&self, path: &str) -> Result<Subscription> {
        let segments = split_path(path)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut tree = self.tree();
            let current = read_at(&tree.root, &segments);
            // Receiver is alive, the initial send cannot fail
            let _ = tx.send(current.clone());
            let id = tree.next_id;
            tree.next_id += 1;
            tree.subscribers.insert(
                id,
                Subscriber {
                    path: segments,
                    tx,
                    last: current,
                },
            );
            id
        };
        debug!(path = %path, id, "Subscriber added");

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(path.to_string(), rx, move || {
            if let Some(inner) = inner.upgrade() {
                let mut tree = inner.lock().unwrap_or_else(PoisonError::into_inner);
                tree.subscribers.remove(&id);
            }
        }))
    }
}

impl RoomStore for MemoryStore {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.read(path)
    }

    #[instrument(level = "debug", skip(self, value))]
    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.write(path, value)
    }

    #[instrument(level = "debug", skip(self, fields))]
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.write_fields(path, fields)
    }

    #[instrument(level = "debug", skip(self))]
    async fn remove(&self, path: &str) -> Result<()> {
        self.write(path, Value::Null)
    }

    #[instrument(level = "debug", skip(self, apply))]
    async fn transaction<F>(&self, path: &str, apply: F) -> Result<Value>
    where
        F: Fn(Option<Value>) -> Value + Send + 'static,
    {
        self.read_modify_write(path, apply)
    }

    #[instrument(level = "debug", skip(self))]
    async fn subscribe(&self, path: &str) -> Result<Subscription> {
        self.add_subscriber(path)
    }
}

impl Tree {
    /// Set or (for `null`) remove the value at a non-empty path
    fn write(&mut self, path: &[String], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };

        if value.is_null() {
            remove_at(&mut self.root, path);
            return;
        }

        let mut map = &mut self.root;
        for segment in parents {
            let entry = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            map = ensure_object(entry);
        }
        map.insert(last.clone(), value);
    }

    /// Push the new value to every observer whose view may have changed
    fn notify(&mut self, changed: &[String]) {
        let root = &self.root;
        let mut closed = Vec::new();

        for (id, sub) in self.subscribers.iter_mut() {
            if !(sub.path.starts_with(changed) || changed.starts_with(&sub.path)) {
                continue;
            }
            let current = read_at(root, &sub.path);
            if current == sub.last {
                continue;
            }
            if sub.tx.send(current.clone()).is_err() {
                closed.push(*id);
                continue;
            }
            sub.last = current;
        }

        for id in closed {
            self.subscribers.remove(&id);
        }
    }
}

fn writable_path(path: &str) -> Result<Vec<String>> {
    let segments = split_path(path)?;
    if segments.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

fn read_at(root: &Map<String, Value>, path: &[String]) -> Option<Value> {
    let Some((first, rest)) = path.split_first() else {
        return (!root.is_empty()).then(|| Value::Object(root.clone()));
    };
    let mut node = root.get(first)?;
    for segment in rest {
        node = node.as_object()?.get(segment)?;
    }
    Some(node.clone())
}

/// Remove a value, pruning parents left empty
fn remove_at(map: &mut Map<String, Value>, path: &[String]) {
    match path {
        [] => {}
        [last] => {
            map.remove(last);
        }
        [first, rest @ ..] => {
            let Some(Value::Object(child)) = map.get_mut(first) else {
                return;
            };
            remove_at(child, rest);
            if child.is_empty() {
                map.remove(first);
            }
        }
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("rooms/ABC123", json!({"names": ["A"]})).await.unwrap();

        assert_eq!(
            store.get("rooms/ABC123/names").await.unwrap(),
            Some(json!(["A"]))
        );
        assert_eq!(store.get("rooms/ZZZZZZ").await.unwrap(), None);

        store.remove("rooms/ABC123/names").await.unwrap();
        assert_eq!(store.get("rooms/ABC123").await.unwrap(), None);
        assert_eq!(store.get("").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_overwrites_named_fields() {
        let store = MemoryStore::new();
        store
            .set("rooms/R", json!({"names": ["A"], "winner": "A", "viewers": 2}))
            .await
            .unwrap();
        store
            .update("rooms/R", fields(json!({"names": ["B", "C"], "winner": null})))
            .await
            .unwrap();

        assert_eq!(
            store.get("rooms/R").await.unwrap(),
            Some(json!({"names": ["B", "C"], "viewers": 2}))
        );
    }

    #[tokio::test]
    async fn test_root_writes_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.set("/", json!(1)).await,
            Err(Error::InvalidPath(_))
        ));
        assert!(store.set("rooms/a.b", json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_subscription_delivers_current_then_changes() {
        let store = MemoryStore::new();
        store.set("rooms/R/names", json!(["A"])).await.unwrap();

        let mut sub = store.subscribe("rooms/R").await.unwrap();
        assert_eq!(sub.recv().await, Some(Some(json!({"names": ["A"]}))));

        store.set("rooms/R/totalSpins", json!(1)).await.unwrap();
        assert_eq!(
            sub.recv().await,
            Some(Some(json!({"names": ["A"], "totalSpins": 1})))
        );
    }

    #[tokio::test]
    async fn test_subscription_ignores_unrelated_and_unchanged() {
        let store = MemoryStore::new();
        let mut spin = store.subscribe("rooms/R/spinEvent").await.unwrap();
        assert_eq!(spin.recv().await, Some(None));

        store.set("rooms/R/names", json!(["A"])).await.unwrap();
        store.set("rooms/OTHER/spinEvent", json!({"x": 1})).await.unwrap();
        assert_eq!(spin.try_recv(), None);

        store.set("rooms/R/spinEvent", json!({"intensity": 3})).await.unwrap();
        assert_eq!(spin.try_recv(), Some(Some(json!({"intensity": 3}))));

        // Same value again is not a change
        store
            .update("rooms/R", fields(json!({"spinEvent": {"intensity": 3}})))
            .await
            .unwrap();
        assert_eq!(spin.try_recv(), None);

        store.remove("rooms/R/spinEvent").await.unwrap();
        assert_eq!(spin.try_recv(), Some(None));
    }

    #[tokio::test]
    async fn test_transaction_increments() {
        let store = MemoryStore::new();
        let bump = |current: Option<Value>| {
            json!(current.and_then(|v| v.as_u64()).unwrap_or(0) + 1)
        };

        assert_eq!(store.transaction("rooms/R/viewers", bump).await.unwrap(), json!(1));
        assert_eq!(store.transaction("rooms/R/viewers", bump).await.unwrap(), json!(2));
        assert_eq!(store.get("rooms/R/viewers").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = MemoryStore::new();
        assert_eq!(
            store.compare_and_set("c", None, json!(1)).unwrap(),
            CasOutcome::Applied
        );
        assert_eq!(
            store.compare_and_set("c", None, json!(5)).unwrap(),
            CasOutcome::Conflict(Some(json!(1)))
        );
        assert_eq!(
            store.compare_and_set("c", Some(&json!(1)), json!(2)).unwrap(),
            CasOutcome::Applied
        );
        assert_eq!(store.get("c").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let store = MemoryStore::new();
        let sub = store.subscribe("rooms/R").await.unwrap();
        assert_eq!(store.subscriber_count(), 1);
        drop(sub);
        assert_eq!(store.subscriber_count(), 0);
    }
}
