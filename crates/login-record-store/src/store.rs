//! The record store contract.

use crate::{StorePath, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Opaque handle identifying an active child watch.
pub type SubscriptionId = u64;

/// A newly observed direct child of a watched path.
#[derive(Debug, Clone)]
pub struct ChildAdded {
    /// The child's key under the watched path.
    pub key: String,
    /// Snapshot of the child's value at observation time.
    pub value: Value,
}

/// An active watch on a path's direct children.
///
/// Dropping the receiver does not cancel the watch; call
/// [`RecordStore::unwatch`] with `id` to release it.
pub struct ChildSubscription {
    /// Handle to pass to [`RecordStore::unwatch`].
    pub id: SubscriptionId,
    /// Delivery channel. Existing children are replayed on subscribe, then
    /// each newly created direct child is delivered once, in append order.
    pub receiver: mpsc::Receiver<ChildAdded>,
}

/// Primitives the relay needs from the backing realtime database client.
///
/// Implementations must be thread-safe; every operation is a potential
/// suspension point. The relay holds no locks across calls.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Begin watching `path` for newly created direct children. Children
    /// already present are replayed through the subscription first.
    async fn watch_children(&self, path: &StorePath) -> StoreResult<ChildSubscription>;

    /// Stop a watch. After this returns, no further children are delivered
    /// on the subscription. Unknown handles are ignored.
    async fn unwatch(&self, id: SubscriptionId) -> StoreResult<()>;

    /// Read the current value at `path`, or None when nothing is stored there.
    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>>;

    /// Write `value` at `path`, creating intermediate containers as needed
    /// and overwriting any existing value.
    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()>;

    /// Remove the value (and any subtree) at `path`. Removing an absent
    /// path is a no-op.
    async fn remove(&self, path: &StorePath) -> StoreResult<()>;

    /// Append `value` under `path` with a store-assigned unique key, and
    /// return that key.
    async fn push(&self, path: &StorePath, value: Value) -> StoreResult<String>;
}
