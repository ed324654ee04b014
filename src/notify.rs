use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

/// A status change to announce to one recipient about one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusNotice {
    pub doc_id: String,
    pub title: String,
    pub status: String,
    pub recipient: String,
}

impl StatusNotice {
    pub fn subject(&self) -> String {
        format!("Status Update for Document ID {}", self.doc_id)
    }

    pub fn body(&self) -> String {
        format!(
            "Document '{}' has been updated to status: {}.",
            self.title, self.status
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_status_update(&self, notice: &StatusNotice) -> Result<()>;
}

/// Writes notices to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_status_update(&self, notice: &StatusNotice) -> Result<()> {
        info!(
            doc_id = %notice.doc_id,
            recipient = %notice.recipient,
            subject = %notice.subject(),
            "status notice (no delivery configured)"
        );
        Ok(())
    }
}

/// Posts notices as JSON to a mail relay or any other HTTP hook.
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    subject: String,
    body: String,
    doc_id: &'a str,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_status_update(&self, notice: &StatusNotice) -> Result<()> {
        let payload = WebhookPayload {
            to: &notice.recipient,
            subject: notice.subject(),
            body: notice.body(),
            doc_id: &notice.doc_id,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("notification request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("notification webhook returned {status}: {body}");
        }
        Ok(())
    }
}
