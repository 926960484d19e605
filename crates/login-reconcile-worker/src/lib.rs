//! # LoginReconciler: login-record reconciliation loop
//!
//! The relay's engine. Clients write pending login records under
//! `<root>/logins`; this crate watches that path, classifies every
//! observed record, and drives each one to a terminal state: a minted
//! token written back and the record removed, or the record drained into
//! a quarantine bucket for inspection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ child added ┌─────────────────┐ GET + Authorization ┌──────────┐
//! │ Record Store │────────────▶│ LoginReconciler │────────────────────▶│ Provider │
//! │  (<root>/    │◀────────────│  (per-record    │                     └──────────┘
//! │   logins)    │ write/remove│   tokio task)   │────▶ TokenIssuer (mint)
//! └──────────────┘             └────────┬────────┘
//!                                       │ token / response / error
//!                                       ▼
//!                                 RelayObserver
//! ```
//!
//! ## Classification
//!
//! Per observed record, in order:
//!
//! 1. A `token` field → stray artifact; relocate to
//!    `<root>/unhandledTokens/<key>`, then remove the original.
//! 2. An `error` field → leftover failure; relocate to
//!    `<root>/unhandledErrors/<key>`, then remove the original.
//! 3. Provider URL and credentials both present → verify, mint, write the
//!    token back, remove the record.
//! 4. Anything else → incomplete record; reported, nothing written.
//!
//! Stray-artifact checks run first so a record left half-resolved by an
//! earlier run is always drained instead of re-verified.
//!
//! ## Failure handling
//!
//! A verification, minting, or write-back failure marks the record: the
//! failure detail is written into its `error` field in place, and the
//! record is then re-observed explicitly and drained through branch 2
//! into `unhandledErrors`. The quarantined copy keeps the `error` field
//! as a forensic trail. One record's failure never touches the watch
//! subscription or any other record.
//!
//! ## Concurrency
//!
//! A single dispatcher task receives child-added notifications and fans
//! each record out to its own tokio task. Records are independent; no
//! ordering is guaranteed or needed across them. [`LoginReconciler::stop`]
//! prevents further dispatch but lets in-flight record tasks run to
//! completion.

mod error;
mod observer;

pub use error::{ReconcileError, ReconcileResult};
pub use observer::RelayObserver;

use custom_token_issuer::TokenIssuer;
use identity_verifier_client::CredentialVerifier;
use login_record_store::{
    LoginRecord, RecordStore, StorePath, SubscriptionId, ERROR_FIELD, TOKEN_FIELD,
};
use observer::ObserverSet;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Child of the root where clients write pending logins.
const LOGINS_BUCKET: &str = "logins";
/// Quarantine bucket for records carrying a stray token.
const UNHANDLED_TOKENS_BUCKET: &str = "unhandledTokens";
/// Quarantine bucket for records carrying a recorded failure.
const UNHANDLED_ERRORS_BUCKET: &str = "unhandledErrors";

/// Terminal state a record observation reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Stray token relocated to the `unhandledTokens` bucket.
    StrayTokenQuarantined,
    /// Previously failed record relocated to the `unhandledErrors` bucket.
    FailedRecordQuarantined,
    /// Credentials verified; token written back and the record removed.
    TokenIssued,
    /// Verification failed; the marked record was drained on re-observation.
    VerificationFailed,
}

/// Services and paths shared by every per-record task.
struct Shared {
    store: Arc<dyn RecordStore>,
    verifier: Arc<dyn CredentialVerifier>,
    issuer: Arc<dyn TokenIssuer>,
    observers: ObserverSet,
    logins: StorePath,
    unhandled_tokens: StorePath,
    unhandled_errors: StorePath,
}

struct WatchGuard {
    subscription: SubscriptionId,
    dispatcher: JoinHandle<()>,
}

/// Watches a login path and resolves every observed record exactly once.
///
/// # Lifecycle
///
/// 1. Create with [`LoginReconciler::new`]
/// 2. Register observers with [`add_observer`](Self::add_observer)
/// 3. Call [`start`](Self::start) to begin watching
/// 4. Call [`stop`](Self::stop) to end watching
///
/// Both lifecycle calls are idempotent: repeated `start` never
/// double-subscribes, repeated `stop` never fails.
pub struct LoginReconciler {
    shared: Arc<Shared>,
    watch: Mutex<Option<WatchGuard>>,
}

impl LoginReconciler {
    /// Creates a reconciler watching `<root>/logins`.
    ///
    /// # Errors
    ///
    /// Fails when `root` is not a valid store path string; this is the
    /// relay's only fatal startup condition besides issuer key material.
    pub fn new(
        store: Arc<dyn RecordStore>,
        verifier: Arc<dyn CredentialVerifier>,
        issuer: Arc<dyn TokenIssuer>,
        root: &str,
    ) -> ReconcileResult<Self> {
        let root = StorePath::parse(root)?;
        let shared = Shared {
            store,
            verifier,
            issuer,
            observers: ObserverSet::default(),
            logins: root.child(LOGINS_BUCKET)?,
            unhandled_tokens: root.child(UNHANDLED_TOKENS_BUCKET)?,
            unhandled_errors: root.child(UNHANDLED_ERRORS_BUCKET)?,
        };
        Ok(Self {
            shared: Arc::new(shared),
            watch: Mutex::new(None),
        })
    }

    /// Registers an observer for token / response / error notifications.
    pub fn add_observer(&self, observer: Arc<dyn RelayObserver>) {
        self.shared.observers.add(observer);
    }

    /// Begins watching the login path. Children already present in the
    /// store are replayed and drained first (leftovers from a previous
    /// run). Calling `start` while already watching is a no-op.
    pub async fn start(&self) -> ReconcileResult<()> {
        let mut guard = self.watch.lock().await;
        if guard.is_some() {
            debug!("login watch already started");
            return Ok(());
        }

        let subscription = self.shared.store.watch_children(&self.shared.logins).await?;
        let shared = self.shared.clone();
        let mut receiver = subscription.receiver;

        let dispatcher = tokio::spawn(async move {
            while let Some(added) = receiver.recv().await {
                let shared = shared.clone();
                tokio::spawn(async move {
                    match resolve_record(&shared, &added.key, &added.value).await {
                        Ok(resolution) => {
                            debug!(key = %added.key, ?resolution, "login record resolved");
                        }
                        Err(err) => {
                            warn!(key = %added.key, error = %err, "login record left unresolved");
                        }
                    }
                });
            }
            debug!("login watch dispatcher stopped (channel closed)");
        });

        *guard = Some(WatchGuard {
            subscription: subscription.id,
            dispatcher,
        });
        info!(path = %self.shared.logins, "login watch started");
        Ok(())
    }

    /// Ends the watch. After this returns no further records are
    /// dispatched; record tasks already running complete on their own.
    /// Calling `stop` without an active watch is a no-op.
    pub async fn stop(&self) -> ReconcileResult<()> {
        let mut guard = self.watch.lock().await;
        let Some(watch) = guard.take() else {
            return Ok(());
        };

        self.shared.store.unwatch(watch.subscription).await?;
        watch.dispatcher.abort();
        info!(path = %self.shared.logins, "login watch stopped");
        Ok(())
    }

    /// Classifies and fully resolves one record snapshot. This is the
    /// entry point every watched record goes through; it is public so a
    /// caller holding a snapshot can drive a record manually.
    pub async fn on_record_observed(&self, key: &str, snapshot: &Value) -> ReconcileResult<Resolution> {
        resolve_record(&self.shared, key, snapshot).await
    }

    /// Runs the verification sub-protocol directly for the record at
    /// `key`, bypassing classification.
    pub async fn verify(
        &self,
        service_provider: &str,
        credentials: &str,
        key: &str,
    ) -> ReconcileResult<Resolution> {
        verify_login(&self.shared, key, service_provider, credentials).await
    }
}

impl std::fmt::Debug for LoginReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginReconciler")
            .field("logins", &self.shared.logins.to_string())
            .finish_non_exhaustive()
    }
}

/// Classify a record and dispatch the matching drain or verification.
async fn resolve_record(shared: &Shared, key: &str, snapshot: &Value) -> ReconcileResult<Resolution> {
    let Some(record) = LoginRecord::from_snapshot(snapshot) else {
        return Err(ReconcileError::IncompleteRecord {
            key: key.to_string(),
        });
    };

    // Stray artifacts first: a record carrying a token or error must be
    // drained, never re-verified, or an inconsistent leftover would loop
    // through verification forever.
    if record.token().is_some() {
        quarantine(shared, &shared.unhandled_tokens, key, &record).await?;
        return Ok(Resolution::StrayTokenQuarantined);
    }
    if record.error().is_some() {
        quarantine(shared, &shared.unhandled_errors, key, &record).await?;
        return Ok(Resolution::FailedRecordQuarantined);
    }

    if let (Some(provider), Some(credentials)) = (record.service_provider(), record.credentials())
    {
        let provider = provider.to_string();
        let credentials = credentials.to_string();
        return verify_login(shared, key, &provider, &credentials).await;
    }

    Err(ReconcileError::IncompleteRecord {
        key: key.to_string(),
    })
}

/// Relocate the uid-tagged record into `bucket`, then remove the original.
/// The write completes before the remove is issued.
async fn quarantine(
    shared: &Shared,
    bucket: &StorePath,
    key: &str,
    record: &LoginRecord,
) -> ReconcileResult<()> {
    let destination = bucket.child(key)?;
    shared
        .store
        .write(&destination, record.tagged_copy(key))
        .await?;
    shared.store.remove(&shared.logins.child(key)?).await?;
    info!(key = %key, bucket = %bucket, "login record quarantined");
    Ok(())
}

/// The verification sub-protocol: one provider call, then either token
/// write-back + removal, or error marking + explicit re-observation.
async fn verify_login(
    shared: &Shared,
    key: &str,
    service_provider: &str,
    credentials: &str,
) -> ReconcileResult<Resolution> {
    match issue_token(shared, key, service_provider, credentials).await {
        Ok(()) => Ok(Resolution::TokenIssued),
        Err(detail) => {
            warn!(key = %key, error = %detail, "login verification failed");
            shared.observers.notify_error(&detail);

            // Mark the record in place; the error field is the forensic
            // trail the quarantined copy will carry.
            let record_path = shared.logins.child(key)?;
            shared
                .store
                .write(&record_path.child(ERROR_FIELD)?, Value::String(detail))
                .await?;

            // Explicit second observation: read the marked record back and
            // classify it again. It now carries an error (or a token, when
            // only the removal failed) and drains to a quarantine bucket.
            // A store-watch re-delivery of the mutated child would do the
            // same; this direct step does not assume that semantics.
            if let Some(snapshot) = shared.store.read(&record_path).await? {
                if let Some(marked) = LoginRecord::from_snapshot(&snapshot) {
                    if marked.token().is_some() {
                        quarantine(shared, &shared.unhandled_tokens, key, &marked).await?;
                    } else if marked.error().is_some() {
                        quarantine(shared, &shared.unhandled_errors, key, &marked).await?;
                    }
                }
            }
            Ok(Resolution::VerificationFailed)
        }
    }
}

/// Happy path: verify, mint, notify, write the token back, remove the
/// record. Any failure collapses into a single textual detail for the
/// error branch of [`verify_login`].
async fn issue_token(
    shared: &Shared,
    key: &str,
    service_provider: &str,
    credentials: &str,
) -> Result<(), String> {
    let verified = shared
        .verifier
        .verify(service_provider, credentials)
        .await
        .map_err(|e| e.to_string())?;

    let token = shared
        .issuer
        .mint(&verified.subject_id, &verified.payload)
        .map_err(|e| e.to_string())?;

    shared.observers.notify_response(&verified.payload);
    shared.observers.notify_token(&token);

    let record_path = shared.logins.child(key).map_err(|e| e.to_string())?;
    shared
        .store
        .write(
            &record_path.child(TOKEN_FIELD).map_err(|e| e.to_string())?,
            Value::String(token),
        )
        .await
        .map_err(|e| e.to_string())?;
    shared
        .store
        .remove(&record_path)
        .await
        .map_err(|e| e.to_string())?;

    info!(key = %key, subject_id = %verified.subject_id, "login verified and token issued");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use custom_token_issuer::{IssuerError, IssuerResult};
    use identity_verifier_client::{VerificationResult, VerifierError, VerifierResult};
    use login_record_store::{MemoryRecordStore, CREDENTIALS_FIELD, SERVICE_PROVIDER_FIELD};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{sleep, Duration};

    // =========================================================================
    // Mock implementations
    // =========================================================================

    enum VerifierBehavior {
        Succeed(Value),
        FailProvider(u16),
    }

    struct RecordingVerifier {
        behavior: VerifierBehavior,
        calls: StdMutex<Vec<(String, String)>>,
    }

    impl RecordingVerifier {
        fn succeeding(payload: Value) -> Arc<Self> {
            Arc::new(Self {
                behavior: VerifierBehavior::Succeed(payload),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                behavior: VerifierBehavior::FailProvider(status),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CredentialVerifier for RecordingVerifier {
        async fn verify(
            &self,
            service_provider: &str,
            credentials: &str,
        ) -> VerifierResult<VerificationResult> {
            self.calls
                .lock()
                .unwrap()
                .push((service_provider.to_string(), credentials.to_string()));
            match &self.behavior {
                VerifierBehavior::Succeed(payload) => Ok(VerificationResult {
                    subject_id: payload
                        .get("id_str")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    payload: payload.clone(),
                }),
                VerifierBehavior::FailProvider(status) => Err(VerifierError::Provider {
                    status: *status,
                    body_summary: "len=0,digest=0000000000000000".to_string(),
                }),
            }
        }
    }

    struct RecordingIssuer {
        token: Option<String>,
        calls: StdMutex<Vec<(String, Value)>>,
    }

    impl RecordingIssuer {
        fn minting(token: &str) -> Arc<Self> {
            Arc::new(Self {
                token: Some(token.to_string()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                token: None,
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TokenIssuer for RecordingIssuer {
        fn mint(&self, subject_id: &str, claims: &Value) -> IssuerResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push((subject_id.to_string(), claims.clone()));
            match &self.token {
                Some(token) => Ok(token.clone()),
                None => Err(IssuerError::Config("signing unavailable".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        tokens: StdMutex<Vec<String>>,
        responses: StdMutex<Vec<Value>>,
        errors: StdMutex<Vec<String>>,
    }

    impl RelayObserver for RecordingObserver {
        fn on_token(&self, token: &str) {
            self.tokens.lock().unwrap().push(token.to_string());
        }
        fn on_response(&self, payload: &Value) {
            self.responses.lock().unwrap().push(payload.clone());
        }
        fn on_error(&self, detail: &str) {
            self.errors.lock().unwrap().push(detail.to_string());
        }
    }

    // =========================================================================
    // Harness
    // =========================================================================

    struct Harness {
        store: Arc<MemoryRecordStore>,
        verifier: Arc<RecordingVerifier>,
        issuer: Arc<RecordingIssuer>,
        observer: Arc<RecordingObserver>,
        relay: LoginReconciler,
    }

    fn harness(verifier: Arc<RecordingVerifier>, issuer: Arc<RecordingIssuer>) -> Harness {
        let store = Arc::new(MemoryRecordStore::new());
        let observer = Arc::new(RecordingObserver::default());
        let relay = LoginReconciler::new(
            store.clone(),
            verifier.clone(),
            issuer.clone(),
            "digits",
        )
        .unwrap();
        relay.add_observer(observer.clone());
        Harness {
            store,
            verifier,
            issuer,
            observer,
            relay,
        }
    }

    fn logins(key: &str) -> StorePath {
        StorePath::parse("digits/logins").unwrap().child(key).unwrap()
    }

    fn unhandled_tokens(key: &str) -> StorePath {
        StorePath::parse("digits/unhandledTokens")
            .unwrap()
            .child(key)
            .unwrap()
    }

    fn unhandled_errors(key: &str) -> StorePath {
        StorePath::parse("digits/unhandledErrors")
            .unwrap()
            .child(key)
            .unwrap()
    }

    async fn read(store: &MemoryRecordStore, path: &StorePath) -> Option<Value> {
        store.read(path).await.unwrap()
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn new_rejects_invalid_root() {
        let store = Arc::new(MemoryRecordStore::new());
        let result = LoginReconciler::new(
            store,
            RecordingVerifier::failing(500),
            RecordingIssuer::failing(),
            "",
        );
        assert!(result.is_err());
    }

    // =========================================================================
    // Stray artifact quarantine
    // =========================================================================

    #[tokio::test]
    async fn stray_token_is_quarantined() {
        let h = harness(RecordingVerifier::failing(500), RecordingIssuer::failing());
        let snapshot = json!({"token": "leftover"});
        h.store.write(&logins("z9"), snapshot.clone()).await.unwrap();

        let resolution = h.relay.on_record_observed("z9", &snapshot).await.unwrap();

        assert_eq!(resolution, Resolution::StrayTokenQuarantined);
        assert_eq!(
            read(&h.store, &unhandled_tokens("z9")).await,
            Some(json!({"token": "leftover", "uid": "z9"}))
        );
        assert_eq!(read(&h.store, &logins("z9")).await, None);
        assert!(h.verifier.calls().is_empty());
    }

    #[tokio::test]
    async fn stray_token_wins_over_fresh_credentials() {
        let h = harness(
            RecordingVerifier::succeeding(json!({"id_str": "42"})),
            RecordingIssuer::minting("tok"),
        );
        let snapshot = json!({
            "token": "stale",
            SERVICE_PROVIDER_FIELD: "https://api.example/verify",
            CREDENTIALS_FIELD: "Bearer xyz",
        });
        h.store.write(&logins("mixed"), snapshot.clone()).await.unwrap();

        let resolution = h.relay.on_record_observed("mixed", &snapshot).await.unwrap();

        assert_eq!(resolution, Resolution::StrayTokenQuarantined);
        assert!(h.verifier.calls().is_empty());
        assert!(read(&h.store, &unhandled_tokens("mixed")).await.is_some());
    }

    #[tokio::test]
    async fn recorded_error_is_quarantined() {
        let h = harness(RecordingVerifier::failing(500), RecordingIssuer::failing());
        let snapshot = json!({"error": "boom", "extra": 1});
        h.store.write(&logins("e1"), snapshot.clone()).await.unwrap();

        let resolution = h.relay.on_record_observed("e1", &snapshot).await.unwrap();

        assert_eq!(resolution, Resolution::FailedRecordQuarantined);
        assert_eq!(
            read(&h.store, &unhandled_errors("e1")).await,
            Some(json!({"error": "boom", "extra": 1, "uid": "e1"}))
        );
        assert_eq!(read(&h.store, &logins("e1")).await, None);
    }

    // =========================================================================
    // Verification success
    // =========================================================================

    #[tokio::test]
    async fn verifier_called_exactly_once_with_exact_values() {
        let h = harness(
            RecordingVerifier::succeeding(json!({"id_str": "42"})),
            RecordingIssuer::minting("tok"),
        );
        let snapshot = json!({
            SERVICE_PROVIDER_FIELD: "https://api.example/verify",
            CREDENTIALS_FIELD: "Bearer xyz",
        });
        h.store.write(&logins("abc123"), snapshot.clone()).await.unwrap();

        h.relay.on_record_observed("abc123", &snapshot).await.unwrap();

        assert_eq!(
            h.verifier.calls(),
            vec![(
                "https://api.example/verify".to_string(),
                "Bearer xyz".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn successful_verification_issues_token_and_removes_record() {
        let payload = json!({"id_str": "42", "screen_name": "bob"});
        let h = harness(
            RecordingVerifier::succeeding(payload.clone()),
            RecordingIssuer::minting("signed.jwt.value"),
        );
        let snapshot = json!({
            SERVICE_PROVIDER_FIELD: "https://api.example/verify",
            CREDENTIALS_FIELD: "Bearer xyz",
        });
        h.store.write(&logins("abc123"), snapshot.clone()).await.unwrap();

        let resolution = h.relay.on_record_observed("abc123", &snapshot).await.unwrap();

        assert_eq!(resolution, Resolution::TokenIssued);
        assert_eq!(h.issuer.calls(), vec![("42".to_string(), payload.clone())]);
        assert_eq!(
            *h.observer.tokens.lock().unwrap(),
            vec!["signed.jwt.value".to_string()]
        );
        assert_eq!(*h.observer.responses.lock().unwrap(), vec![payload]);
        assert!(h.observer.errors.lock().unwrap().is_empty());
        // The record itself is gone; the token write preceded the removal.
        assert_eq!(read(&h.store, &logins("abc123")).await, None);
        assert_eq!(read(&h.store, &unhandled_errors("abc123")).await, None);
    }

    #[tokio::test]
    async fn verify_can_be_driven_directly() {
        let h = harness(
            RecordingVerifier::succeeding(json!({"id_str": "7"})),
            RecordingIssuer::minting("direct.jwt"),
        );
        h.store
            .write(
                &logins("d1"),
                json!({
                    SERVICE_PROVIDER_FIELD: "https://api.example/verify",
                    CREDENTIALS_FIELD: "Bearer xyz",
                }),
            )
            .await
            .unwrap();

        let resolution = h
            .relay
            .verify("https://api.example/verify", "Bearer xyz", "d1")
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::TokenIssued);
        assert_eq!(read(&h.store, &logins("d1")).await, None);
        assert_eq!(*h.observer.tokens.lock().unwrap(), vec!["direct.jwt".to_string()]);
    }

    // =========================================================================
    // Verification failure
    // =========================================================================

    #[tokio::test]
    async fn provider_failure_marks_then_drains_record() {
        let h = harness(RecordingVerifier::failing(403), RecordingIssuer::failing());
        let snapshot = json!({
            SERVICE_PROVIDER_FIELD: "https://api.example/verify",
            CREDENTIALS_FIELD: "Bearer bad",
        });
        h.store.write(&logins("f1"), snapshot.clone()).await.unwrap();

        let resolution = h.relay.on_record_observed("f1", &snapshot).await.unwrap();

        assert_eq!(resolution, Resolution::VerificationFailed);

        let errors = h.observer.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("403"), "detail: {}", errors[0]);

        // The record drained to unhandledErrors carrying the marked error
        // field and its provenance.
        let drained = read(&h.store, &unhandled_errors("f1")).await.unwrap();
        assert_eq!(drained["uid"], json!("f1"));
        assert_eq!(drained[SERVICE_PROVIDER_FIELD], json!("https://api.example/verify"));
        assert!(drained["error"].as_str().unwrap().contains("403"));
        assert_eq!(read(&h.store, &logins("f1")).await, None);

        // No token activity on the failure path.
        assert!(h.observer.tokens.lock().unwrap().is_empty());
        assert!(h.observer.responses.lock().unwrap().is_empty());
        assert!(h.issuer.calls().is_empty());
    }

    #[tokio::test]
    async fn issuer_failure_marks_then_drains_record() {
        let h = harness(
            RecordingVerifier::succeeding(json!({"id_str": "42"})),
            RecordingIssuer::failing(),
        );
        let snapshot = json!({
            SERVICE_PROVIDER_FIELD: "https://api.example/verify",
            CREDENTIALS_FIELD: "Bearer xyz",
        });
        h.store.write(&logins("m1"), snapshot.clone()).await.unwrap();

        let resolution = h.relay.on_record_observed("m1", &snapshot).await.unwrap();

        assert_eq!(resolution, Resolution::VerificationFailed);
        let drained = read(&h.store, &unhandled_errors("m1")).await.unwrap();
        assert!(drained["error"].as_str().unwrap().contains("signing unavailable"));
        // The verifier succeeded, so it was still called exactly once.
        assert_eq!(h.verifier.calls().len(), 1);
        assert!(h.observer.tokens.lock().unwrap().is_empty());
    }

    // =========================================================================
    // Incomplete records
    // =========================================================================

    #[tokio::test]
    async fn incomplete_record_is_reported_without_mutation() {
        let h = harness(RecordingVerifier::failing(500), RecordingIssuer::failing());
        let snapshot = json!({SERVICE_PROVIDER_FIELD: "https://api.example/verify"});
        h.store.write(&logins("inc"), snapshot.clone()).await.unwrap();
        let before = h.store.snapshot();

        let err = h.relay.on_record_observed("inc", &snapshot).await.unwrap_err();

        assert!(matches!(err, ReconcileError::IncompleteRecord { ref key } if key == "inc"));
        assert_eq!(h.store.snapshot(), before);
        assert!(h.verifier.calls().is_empty());
        assert!(h.observer.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_credential_strings_count_as_incomplete() {
        let h = harness(RecordingVerifier::failing(500), RecordingIssuer::failing());
        let snapshot = json!({
            SERVICE_PROVIDER_FIELD: "https://api.example/verify",
            CREDENTIALS_FIELD: "",
        });

        let err = h.relay.on_record_observed("inc2", &snapshot).await.unwrap_err();
        assert!(matches!(err, ReconcileError::IncompleteRecord { .. }));
    }

    #[tokio::test]
    async fn non_object_snapshot_is_incomplete() {
        let h = harness(RecordingVerifier::failing(500), RecordingIssuer::failing());

        let err = h
            .relay
            .on_record_observed("odd", &json!("just a string"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::IncompleteRecord { .. }));
    }

    // =========================================================================
    // Watch lifecycle
    // =========================================================================

    #[tokio::test]
    async fn started_relay_resolves_pushed_records() {
        let payload = json!({"id_str": "42", "screen_name": "bob"});
        let h = harness(
            RecordingVerifier::succeeding(payload),
            RecordingIssuer::minting("signed.jwt.value"),
        );
        h.relay.start().await.unwrap();

        let logins_path = StorePath::parse("digits/logins").unwrap();
        let key = h
            .store
            .push(
                &logins_path,
                json!({
                    SERVICE_PROVIDER_FIELD: "https://api.example/verify",
                    CREDENTIALS_FIELD: "Bearer xyz",
                }),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;

        assert_eq!(h.verifier.calls().len(), 1);
        assert_eq!(
            read(&h.store, &logins_path.child(&key).unwrap()).await,
            None
        );
        assert_eq!(
            *h.observer.tokens.lock().unwrap(),
            vec!["signed.jwt.value".to_string()]
        );
    }

    #[tokio::test]
    async fn start_replays_and_drains_leftover_records() {
        let h = harness(RecordingVerifier::failing(500), RecordingIssuer::failing());
        h.store
            .write(&logins("old"), json!({"error": "stale failure"}))
            .await
            .unwrap();

        h.relay.start().await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(
            read(&h.store, &unhandled_errors("old")).await,
            Some(json!({"error": "stale failure", "uid": "old"}))
        );
        assert_eq!(read(&h.store, &logins("old")).await, None);
    }

    #[tokio::test]
    async fn start_twice_does_not_double_process() {
        let h = harness(
            RecordingVerifier::succeeding(json!({"id_str": "42"})),
            RecordingIssuer::minting("tok"),
        );
        h.relay.start().await.unwrap();
        h.relay.start().await.unwrap();

        h.store
            .push(
                &StorePath::parse("digits/logins").unwrap(),
                json!({
                    SERVICE_PROVIDER_FIELD: "https://api.example/verify",
                    CREDENTIALS_FIELD: "Bearer xyz",
                }),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.verifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn stopped_relay_ignores_new_records() {
        let h = harness(
            RecordingVerifier::succeeding(json!({"id_str": "42"})),
            RecordingIssuer::minting("tok"),
        );
        h.relay.start().await.unwrap();
        h.relay.stop().await.unwrap();

        let logins_path = StorePath::parse("digits/logins").unwrap();
        let key = h
            .store
            .push(
                &logins_path,
                json!({
                    SERVICE_PROVIDER_FIELD: "https://api.example/verify",
                    CREDENTIALS_FIELD: "Bearer xyz",
                }),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;

        assert!(h.verifier.calls().is_empty());
        // The record stays queued for a future run.
        assert!(read(&h.store, &logins_path.child(&key).unwrap())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let h = harness(RecordingVerifier::failing(500), RecordingIssuer::failing());
        h.relay.stop().await.unwrap();
        h.relay.stop().await.unwrap();
    }

    #[tokio::test]
    async fn relay_can_restart_after_stop() {
        let h = harness(
            RecordingVerifier::succeeding(json!({"id_str": "42"})),
            RecordingIssuer::minting("tok"),
        );
        h.relay.start().await.unwrap();
        h.relay.stop().await.unwrap();
        h.relay.start().await.unwrap();

        h.store
            .push(
                &StorePath::parse("digits/logins").unwrap(),
                json!({
                    SERVICE_PROVIDER_FIELD: "https://api.example/verify",
                    CREDENTIALS_FIELD: "Bearer xyz",
                }),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.verifier.calls().len(), 1);
    }

    // =========================================================================
    // Operation ordering
    // =========================================================================

    /// Store decorator recording the sequence of mutating operations.
    struct OpLogStore {
        inner: Arc<MemoryRecordStore>,
        ops: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl RecordStore for OpLogStore {
        async fn watch_children(
            &self,
            path: &StorePath,
        ) -> login_record_store::StoreResult<login_record_store::ChildSubscription> {
            self.inner.watch_children(path).await
        }

        async fn unwatch(
            &self,
            id: SubscriptionId,
        ) -> login_record_store::StoreResult<()> {
            self.inner.unwatch(id).await
        }

        async fn read(
            &self,
            path: &StorePath,
        ) -> login_record_store::StoreResult<Option<Value>> {
            self.inner.read(path).await
        }

        async fn write(
            &self,
            path: &StorePath,
            value: Value,
        ) -> login_record_store::StoreResult<()> {
            self.ops.lock().unwrap().push(format!("write {}", path));
            self.inner.write(path, value).await
        }

        async fn remove(&self, path: &StorePath) -> login_record_store::StoreResult<()> {
            self.ops.lock().unwrap().push(format!("remove {}", path));
            self.inner.remove(path).await
        }

        async fn push(
            &self,
            path: &StorePath,
            value: Value,
        ) -> login_record_store::StoreResult<String> {
            self.inner.push(path, value).await
        }
    }

    #[tokio::test]
    async fn token_write_precedes_record_removal() {
        let oplog = Arc::new(OpLogStore {
            inner: Arc::new(MemoryRecordStore::new()),
            ops: StdMutex::new(Vec::new()),
        });
        let relay = LoginReconciler::new(
            oplog.clone(),
            RecordingVerifier::succeeding(json!({"id_str": "42"})),
            RecordingIssuer::minting("tok"),
            "digits",
        )
        .unwrap();

        let snapshot = json!({
            SERVICE_PROVIDER_FIELD: "https://api.example/verify",
            CREDENTIALS_FIELD: "Bearer xyz",
        });
        oplog.inner.write(&logins("abc"), snapshot.clone()).await.unwrap();
        relay.on_record_observed("abc", &snapshot).await.unwrap();

        let ops = oplog.ops.lock().unwrap().clone();
        assert_eq!(
            ops,
            vec![
                "write digits/logins/abc/token".to_string(),
                "remove digits/logins/abc".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn quarantine_write_precedes_removal() {
        let oplog = Arc::new(OpLogStore {
            inner: Arc::new(MemoryRecordStore::new()),
            ops: StdMutex::new(Vec::new()),
        });
        let relay = LoginReconciler::new(
            oplog.clone(),
            RecordingVerifier::failing(500),
            RecordingIssuer::failing(),
            "digits",
        )
        .unwrap();

        let snapshot = json!({"token": "leftover"});
        oplog.inner.write(&logins("z9"), snapshot.clone()).await.unwrap();
        relay.on_record_observed("z9", &snapshot).await.unwrap();

        let ops = oplog.ops.lock().unwrap().clone();
        assert_eq!(
            ops,
            vec![
                "write digits/unhandledTokens/z9".to_string(),
                "remove digits/logins/z9".to_string(),
            ]
        );
    }
}
