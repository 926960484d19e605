//! Observer registration surface for relay lifecycle events.

use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Receives advisory notifications from the reconciliation loop.
///
/// All methods default to no-ops; implement only the events of interest.
/// Notifications carry no control-flow weight: the loop behaves
/// identically with zero observers registered.
pub trait RelayObserver: Send + Sync {
    /// A custom token was minted for a verified login.
    fn on_token(&self, _token: &str) {}

    /// A provider returned a successful verification payload.
    fn on_response(&self, _payload: &Value) {}

    /// A login failed verification, minting, or write-back.
    fn on_error(&self, _detail: &str) {}
}

/// Registered observers, notified synchronously in registration order.
#[derive(Default)]
pub(crate) struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn RelayObserver>>>,
}

impl ObserverSet {
    pub(crate) fn add(&self, observer: Arc<dyn RelayObserver>) {
        self.observers
            .write()
            .expect("lock poisoned")
            .push(observer);
    }

    pub(crate) fn notify_token(&self, token: &str) {
        for observer in self.observers.read().expect("lock poisoned").iter() {
            observer.on_token(token);
        }
    }

    pub(crate) fn notify_response(&self, payload: &Value) {
        for observer in self.observers.read().expect("lock poisoned").iter() {
            observer.on_response(payload);
        }
    }

    pub(crate) fn notify_error(&self, detail: &str) {
        for observer in self.observers.read().expect("lock poisoned").iter() {
            observer.on_error(detail);
        }
    }
}
