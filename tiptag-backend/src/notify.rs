// Best-effort tip notifications
//
// Dispatched after the ledger transaction commits. Failures are logged and never
// reach the caller of `record_tip`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::Money;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Facts about a completed tip, addressed to the receiving creator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TipNotification {
    pub to: Option<String>,
    pub creator_handle: String,
    pub tip_id: String,
    pub amount: Money,
    pub currency: String,
    pub tipper_name: String,
    pub message: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_tip(&self, notification: &TipNotification) -> Result<()>;
}

/// Posts notifications as JSON to a transactional email/webhook endpoint
pub struct WebhookNotifier {
    http_client: HttpClient,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        let http_client = HttpClient::builder().timeout(NOTIFY_TIMEOUT).build()?;
        Ok(Self { http_client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_tip(&self, notification: &TipNotification) -> Result<()> {
        if notification.to.is_none() {
            debug!(
                "Creator '{}' has no contact address, skipping notification",
                notification.creator_handle
            );
            return Ok(());
        }

        let resp = self
            .http_client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow!("notification webhook returned {}", resp.status()));
        }
        Ok(())
    }
}

/// Used when no notification endpoint is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_tip(&self, notification: &TipNotification) -> Result<()> {
        info!(
            "Tip {} of {} {} for '{}' from {}",
            notification.tip_id,
            notification.amount,
            notification.currency,
            notification.creator_handle,
            notification.tipper_name
        );
        Ok(())
    }
}

/// Fire-and-forget dispatch on a detached task
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: TipNotification) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify_tip(&notification).await {
            warn!(
                "Failed to send notification for tip {}: {}",
                notification.tip_id, e
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exploding;

    #[async_trait]
    impl Notifier for Exploding {
        async fn notify_tip(&self, _notification: &TipNotification) -> Result<()> {
            Err(anyhow!("smtp down"))
        }
    }

    fn notification() -> TipNotification {
        TipNotification {
            to: None,
            creator_handle: "alice".into(),
            tip_id: "t-1".into(),
            amount: 500,
            currency: "USD".into(),
            tipper_name: "Anonymous".into(),
            message: None,
        }
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let handle = dispatch(Arc::new(Exploding), notification());
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_skips_creators_without_contact() {
        // Unroutable URL: reaching the network would fail the call.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/notify".into()).unwrap();
        assert!(notifier.notify_tip(&notification()).await.is_ok());
    }
}
