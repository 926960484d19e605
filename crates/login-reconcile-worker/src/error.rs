//! Error types for record reconciliation.

use login_record_store::StoreError;
use thiserror::Error;

/// Error type for reconciliation outcomes that leave the store untouched
/// or interrupt a drain mid-way.
///
/// Verification and minting failures are not errors at this level; the
/// loop resolves them into quarantined records.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The record carried no token, no error, and no complete
    /// provider/credentials pair. Reported, never persisted or retried.
    #[error("Record incomplete: {key}")]
    IncompleteRecord {
        /// Store key of the offending record.
        key: String,
    },

    /// A store operation failed while draining or marking a record.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience Result type alias for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
