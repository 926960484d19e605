//! Relay wiring and run loop.

use anyhow::{anyhow, Context};
use custom_token_issuer::JwtTokenIssuer;
use identity_verifier_client::HttpVerifierClient;
use login_record_store::{MemoryRecordStore, RecordStore, StorePath};
use login_reconcile_worker::{LoginReconciler, RelayObserver};
use relay_config_and_utils::Config;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How many leading token characters the logging observer prints.
const TOKEN_PREVIEW_CHARS: usize = 10;

/// Observer logging each relay event, the only consumer wired by default.
struct LoggingObserver;

impl RelayObserver for LoggingObserver {
    fn on_token(&self, token: &str) {
        info!(token = %token_preview(token), "token created");
    }

    fn on_response(&self, payload: &Value) {
        info!(payload = %payload, "provider response");
    }

    fn on_error(&self, detail: &str) {
        error!(detail = %detail, "login verification error");
    }
}

/// First characters of a token, enough to correlate without logging the
/// full signed artifact.
fn token_preview(token: &str) -> String {
    let preview: String = token.chars().take(TOKEN_PREVIEW_CHARS).collect();
    format!("{}...", preview)
}

/// Build the relay from configuration, start it, and run until ctrl-c.
pub async fn run_relay(config: Config, seed: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let secret = config
        .token_secret
        .as_deref()
        .ok_or_else(|| anyhow!("token_secret must be configured (or set RELAY_TOKEN_SECRET)"))?;

    let store = Arc::new(MemoryRecordStore::new());
    let verifier = Arc::new(HttpVerifierClient::new());
    let issuer = Arc::new(JwtTokenIssuer::new(
        secret,
        config.token_issuer.clone(),
        Duration::from_secs(config.token_ttl_secs),
    )?);

    let relay = LoginReconciler::new(
        store.clone(),
        verifier,
        issuer,
        &config.database_root,
    )?;
    relay.add_observer(Arc::new(LoggingObserver));
    relay.start().await?;
    info!(root = %config.database_root, "login relay started");

    if let Some(seed_path) = seed {
        seed_records(store.as_ref(), &config.database_root, &seed_path).await?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    relay.stop().await?;

    Ok(())
}

/// Write the records of a seed file under the watch path, driving the
/// running relay end to end. The file holds one JSON object mapping
/// record keys to login records.
async fn seed_records(
    store: &dyn RecordStore,
    root: &str,
    seed_path: &Path,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(seed_path)
        .with_context(|| format!("failed to read seed file {}", seed_path.display()))?;
    let records: Value = serde_json::from_str(&content)?;
    let records = records
        .as_object()
        .ok_or_else(|| anyhow!("seed file must hold a JSON object of records"))?;

    let logins = StorePath::parse(root)?.child("logins")?;
    for (key, value) in records {
        let path = logins.child(key)?;
        store.write(&path, value.clone()).await?;
        info!(key = %key, "seeded login record");
    }

    Ok(())
}
