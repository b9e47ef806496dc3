//! Notification sink
//!
//! One-way, fire-and-forget messages about orders and failures. Delivery
//! problems are logged and swallowed; a notifier never fails the caller.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        info!(target: "notify", "{}", message);
    }
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Posts `{"content": message}` to a Discord webhook URL
#[derive(Debug, Clone)]
pub struct DiscordWebhook {
    url: String,
    http_client: Client,
}

impl DiscordWebhook {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(DiscordWebhook {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for DiscordWebhook {
    async fn notify(&self, message: &str) {
        info!(target: "notify", "{}", message);

        let result = self
            .http_client
            .post(&self.url)
            .json(&WebhookMessage { content: message })
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Webhook returned {}", resp.status()),
            Err(e) => warn!("Webhook delivery failed: {}", e),
        }
    }
}

/// Webhook when a URL is configured, otherwise the log
pub fn from_webhook_url(url: Option<&str>) -> anyhow::Result<Arc<dyn Notifier>> {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(u) => Ok(Arc::new(DiscordWebhook::new(u)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_payload_shape() {
        let body = serde_json::to_string(&WebhookMessage { content: "KRW-BTC buy" }).unwrap();
        assert_eq!(body, r#"{"content":"KRW-BTC buy"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_does_not_fail() {
        // port 9 (discard) on localhost is closed in test environments
        let hook = DiscordWebhook::new("http://127.0.0.1:9/webhook").unwrap();
        hook.notify("hello").await;
    }

    #[tokio::test]
    async fn test_log_notifier() {
        LogNotifier.notify("hello").await;
        assert!(from_webhook_url(None).is_ok());
        assert!(from_webhook_url(Some("  ")).is_ok());
    }
}
