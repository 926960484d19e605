//! In-memory record store implementation.
//!
//! Backs the relay in tests and development runs with a JSON tree guarded
//! by a lock. Watch semantics follow the realtime-database contract the
//! relay depends on: existing children are replayed on subscribe, and each
//! newly created direct child of a watched path is delivered exactly once.
//! Mutating an existing child in place does not re-notify; the relay's
//! error re-observation is explicit and does not rely on it.

use crate::{
    ChildAdded, ChildSubscription, RecordStore, StoreError, StorePath, StoreResult, SubscriptionId,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

/// Capacity of each subscription's delivery channel.
const WATCH_QUEUE_CAPACITY: usize = 1024;

struct Watcher {
    path: StorePath,
    sender: mpsc::Sender<ChildAdded>,
}

#[derive(Default)]
struct StoreInner {
    tree: Map<String, Value>,
    watchers: HashMap<SubscriptionId, Watcher>,
    next_subscription: SubscriptionId,
}

/// In-memory [`RecordStore`] backed by a JSON object tree.
///
/// Cheaply cloneable via [`Arc`]; all clones share the same tree and
/// watcher registry. Data is not persisted.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryRecordStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entire tree, mainly useful in tests.
    pub fn snapshot(&self) -> Value {
        let inner = self.inner.lock().expect("lock poisoned");
        Value::Object(inner.tree.clone())
    }
}

fn get_at<'a>(tree: &'a Map<String, Value>, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = tree.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write `value` at `segments`, creating intermediate objects. Returns an
/// error when an intermediate location holds a non-object value.
fn set_at(tree: &mut Map<String, Value>, segments: &[String], value: Value) -> StoreResult<()> {
    let (last, parents) = segments.split_last().expect("validated non-empty path");

    let mut current = tree;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(|| {
            StoreError::Backend(format!("cannot write below scalar at segment {:?}", segment))
        })?;
    }
    current.insert(last.clone(), value);
    Ok(())
}

fn remove_at(tree: &mut Map<String, Value>, segments: &[String]) {
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = tree;
    for segment in parents {
        match current.get_mut(segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
    current.remove(last);
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn watch_children(&self, path: &StorePath) -> StoreResult<ChildSubscription> {
        let (sender, receiver) = mpsc::channel(WATCH_QUEUE_CAPACITY);

        let mut inner = self.inner.lock().expect("lock poisoned");
        let id = inner.next_subscription;
        inner.next_subscription += 1;

        // Replay children already present before registering for new ones.
        if let Some(existing) = get_at(&inner.tree, path.segments()).and_then(Value::as_object) {
            for (key, value) in existing {
                let added = ChildAdded {
                    key: key.clone(),
                    value: value.clone(),
                };
                if let Err(err) = sender.try_send(added) {
                    warn!(path = %path, error = %err, "record watch replay overflow");
                }
            }
        }

        inner.watchers.insert(
            id,
            Watcher {
                path: path.clone(),
                sender,
            },
        );

        Ok(ChildSubscription { id, receiver })
    }

    async fn unwatch(&self, id: SubscriptionId) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.watchers.remove(&id);
        Ok(())
    }

    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(get_at(&inner.tree, path.segments()).cloned())
    }

    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");

        // A watcher is only notified when the write creates a new direct
        // child under its path, matching child-added semantics.
        let watched_child_existed: HashMap<SubscriptionId, bool> = inner
            .watchers
            .iter()
            .filter(|(_, w)| w.path.is_ancestor_of(path))
            .map(|(id, w)| {
                let child_segments = &path.segments()[..w.path.segments().len() + 1];
                (*id, get_at(&inner.tree, child_segments).is_some())
            })
            .collect();

        set_at(&mut inner.tree, path.segments(), value)?;

        for (id, existed) in watched_child_existed {
            if existed {
                continue;
            }
            let Some(watcher) = inner.watchers.get(&id) else {
                continue;
            };
            let child_segments = &path.segments()[..watcher.path.segments().len() + 1];
            let Some(child_value) = get_at(&inner.tree, child_segments) else {
                continue;
            };
            let added = ChildAdded {
                key: child_segments
                    .last()
                    .map(String::as_str)
                    .unwrap_or_default()
                    .to_string(),
                value: child_value.clone(),
            };
            if let Err(err) = watcher.sender.try_send(added) {
                warn!(path = %path, error = %err, "record watch delivery failed");
            }
        }

        Ok(())
    }

    async fn remove(&self, path: &StorePath) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        remove_at(&mut inner.tree, path.segments());
        Ok(())
    }

    async fn push(&self, path: &StorePath, value: Value) -> StoreResult<String> {
        let key = uuid::Uuid::new_v4().simple().to_string();
        let child = path.child(&key)?;
        self.write(&child, value).await?;
        Ok(key)
    }
}
