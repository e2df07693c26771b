//! External collaborators: outbound notification and document blob
//! storage. Both are interfaces only as far as the engine is concerned;
//! the reqwest-backed implementations here are thin and carry no
//! consistency logic.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

use crate::errors::{EngineError, Result};

pub const TEMPLATE_ORG_APPROVED: &str = "org_approved";
pub const TEMPLATE_ORG_REJECTED: &str = "org_rejected";

/// Fire-and-forget outbound notification. Failures are the caller's to
/// log; they never fail the operation that triggered them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, template_key: &str, variables: Value) -> Result<()>;
}

/// Document storage returning a URL for stored bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(&self, bytes: Vec<u8>, mime_type: &str, destination_key: &str)
        -> Result<String>;
}

/// POSTs notification payloads to a webhook endpoint (the mail relay
/// lives behind it).
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        WebhookNotifier {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, recipient: &str, template_key: &str, variables: Value) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&json!({
                "recipient": recipient,
                "template": template_key,
                "variables": variables,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Logs instead of delivering; used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, recipient: &str, template_key: &str, _variables: Value) -> Result<()> {
        info!(recipient, template_key, "notification skipped (no webhook configured)");
        Ok(())
    }
}

/// PUTs document bytes to an HTTP blob endpoint under a destination key
/// and expects `{ "url": "..." }` back.
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        HttpBlobStore {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn store(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        destination_key: &str,
    ) -> Result<String> {
        let url = format!("{}/{destination_key}", self.base_url.trim_end_matches('/'));
        let response: Value = self
            .client
            .put(&url)
            .header("content-type", mime_type)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .get("url")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                EngineError::Validation("blob store response did not contain a url".to_string())
            })
    }
}
