//! Webhook notifications (generic JSON or Discord). Fire-and-forget: delivery
//! failures are logged and never reach the caller.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Category {
    OrderPlaced,
    Failure,
    ActionNeeded,
    CapacityExceeded,
    NoGapDown,
    MarketClosed,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::OrderPlaced => "✅ Order Placed",
            Category::Failure => "❌ Error occurred",
            Category::ActionNeeded => "⚠️ Action needed",
            Category::CapacityExceeded => "⏩ Skipping",
            Category::NoGapDown => "🚫 No gap down",
            Category::MarketClosed => "🚫 Market closed",
        }
    }

    /// Routine events go to the noisy channel.
    pub fn is_noisy(self) -> bool {
        matches!(self, Category::NoGapDown | Category::MarketClosed)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, category: Category, message: &str);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WebhookMethod {
    #[default]
    Generic,
    Discord,
}

pub struct WebhookNotifier {
    http: reqwest::Client,
    method: WebhookMethod,
    noisy_url: String,
    normal_url: String,
}

impl WebhookNotifier {
    pub fn new(
        method: WebhookMethod,
        noisy_url: impl Into<String>,
        normal_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build webhook http client")?;
        Ok(Self {
            http,
            method,
            noisy_url: noisy_url.into(),
            normal_url: normal_url.into(),
        })
    }

    fn url_for(&self, category: Category) -> &str {
        if category.is_noisy() {
            &self.noisy_url
        } else {
            &self.normal_url
        }
    }

    fn payload(&self, category: Category, message: &str) -> serde_json::Value {
        match self.method {
            WebhookMethod::Discord => json!({
                "content": format!("{}: {} @everyone", category.label(), message),
                "allowed_mentions": { "parse": ["everyone"] },
            }),
            WebhookMethod::Generic => json!({
                "type": category.label(),
                "message": message,
            }),
        }
    }

    async fn deliver(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .context("post webhook")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("notification failed with status: {}", status);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, category: Category, message: &str) {
        let url = self.url_for(category);
        if url.is_empty() {
            debug!("No webhook for {:?}; dropping notification", category);
            return;
        }
        let body = self.payload(category, message);
        if let Err(e) = self.deliver(url, &body).await {
            warn!("Notification {:?} not delivered: {:#}", category, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(method: WebhookMethod, noisy: String, normal: String) -> WebhookNotifier {
        WebhookNotifier::new(method, noisy, normal, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn generic_payload_goes_to_normal_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/normal"))
            .and(body_json(json!({
                "type": "✅ Order Placed",
                "message": "QQQ gap down -2.10%. Order ID: abc",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let n = notifier(
            WebhookMethod::Generic,
            format!("{}/noisy", server.uri()),
            format!("{}/normal", server.uri()),
        );
        n.notify(Category::OrderPlaced, "QQQ gap down -2.10%. Order ID: abc")
            .await;
    }

    #[tokio::test]
    async fn discord_payload_goes_to_noisy_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/noisy"))
            .and(body_json(json!({
                "content": "🚫 No gap down: flat day @everyone",
                "allowed_mentions": { "parse": ["everyone"] },
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let n = notifier(
            WebhookMethod::Discord,
            format!("{}/noisy", server.uri()),
            format!("{}/normal", server.uri()),
        );
        n.notify(Category::NoGapDown, "flat day").await;
    }

    #[tokio::test]
    async fn delivery_errors_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let n = notifier(WebhookMethod::Generic, String::new(), server.uri());
        n.notify(Category::Failure, "boom").await;
        // Noisy URL is empty: nothing is sent.
        n.notify(Category::MarketClosed, "closed").await;
    }

    #[test]
    fn routing_and_labels() {
        assert!(Category::NoGapDown.is_noisy());
        assert!(Category::MarketClosed.is_noisy());
        assert!(!Category::CapacityExceeded.is_noisy());
        assert_eq!(Category::CapacityExceeded.label(), "⏩ Skipping");
        assert_eq!(Category::ActionNeeded.label(), "⚠️ Action needed");
    }
}
