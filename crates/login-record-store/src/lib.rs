//! Record store adapter for the login relay.
//!
//! Clients write pending login records into a realtime database; the relay
//! observes new children under a watched path and resolves each one. This
//! crate is the store-facing boundary of that pipeline:
//!
//! - [`StorePath`]: validated slash-separated locations in the record tree.
//! - [`LoginRecord`]: a typed view over a record snapshot.
//! - [`RecordStore`]: the watch / read / write / remove / push contract any
//!   backing database client must satisfy.
//! - [`MemoryRecordStore`]: an in-process implementation of that contract
//!   backed by a JSON tree, used by tests and the development binary.
//!
//! Production deployments supply a database-backed [`RecordStore`]; the
//! relay itself never assumes more than this interface.

mod error;
mod memory;
mod path;
mod record;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryRecordStore;
pub use path::StorePath;
pub use record::{
    LoginRecord, CREDENTIALS_FIELD, ERROR_FIELD, SERVICE_PROVIDER_FIELD, TOKEN_FIELD, UID_FIELD,
};
pub use store::{ChildAdded, ChildSubscription, RecordStore, SubscriptionId};
