//! Best-effort webhook delivery. Failures are logged and swallowed; a
//! notification going missing must never fail the request that triggered it.

use serde::Serialize;
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent<'a> {
    pub event: &'a str,
    pub repository: &'a str,
    pub tag: Option<&'a str>,
    pub digest: &'a str,
    pub size: u64,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Self {
        WebhookNotifier {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Fires `event` at the configured URL, 5 s timeout. A missing URL, a
    /// network error, or a non-2xx response are all logged at `warn` and
    /// otherwise ignored.
    pub async fn notify(&self, event: WebhookEvent<'_>) {
        let Some(url) = &self.url else {
            return;
        };
        let result = self
            .client
            .post(url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&event)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    event = event.event,
                    repository = event.repository,
                    "webhook delivery returned non-success status"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event = event.event,
                    repository = event.repository,
                    "webhook delivery failed"
                );
            }
        }
    }
}
