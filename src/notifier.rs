//! Chat-bot notification sink
//!
//! Outbound-only messages to the bot HTTP API. Every send is best-effort:
//! failures are logged and never propagate into request handling.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::config_types::NotifierConfig;
use crate::models::UploadReportEntry;

/// Sends operational messages to the configured chat-bot API
pub struct Notifier {
    client: reqwest::Client,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(config: &NotifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("FileCdn/1.0")
            .build()
            .unwrap_or_default();

        if config.bot_token.is_none() {
            debug!("bot token not configured, notifications disabled");
        }

        Self {
            client,
            config: config.clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.bot_token.is_some()
    }

    /// Summary message after an upload request completes.
    pub async fn notify_upload(
        &self,
        ip: &str,
        files: &[UploadReportEntry],
        successful: usize,
        total: usize,
    ) {
        let mut lines = vec![format!(
            "📤 Upload from {ip}: {successful} of {total} files stored"
        )];
        for entry in files {
            match &entry.error {
                Some(error) => lines.push(format!(
                    "  ✗ {} ({}) → {}: {}",
                    entry.filename, entry.size, entry.db, error
                )),
                None => lines.push(format!(
                    "  ✓ {} ({}) → {}",
                    entry.filename, entry.size, entry.db
                )),
            }
        }
        self.send(&self.config.channel_id, &lines.join("\n")).await;
    }

    /// Event message when a file is downloaded.
    pub async fn notify_download(&self, ip: &str, file_id: &str, filename: &str, size: u64) {
        let text = format!(
            "📥 Download from {ip}: {filename} ({size} bytes, id {file_id})"
        );
        self.send(&self.config.channel_id, &text).await;
    }

    /// Error report for an endpoint failure.
    pub async fn notify_error(&self, endpoint: &str, error: &str) {
        let text = format!("⚠️ Error on {endpoint}: {error}");
        self.send(&self.config.owner_chat_id, &text).await;
    }

    /// Direct message to the owner chat.
    pub async fn notify_owner(&self, text: &str) {
        self.send(&self.config.owner_chat_id, text).await;
    }

    async fn send(&self, chat_id: &str, text: &str) {
        let Some(token) = &self.config.bot_token else {
            return;
        };
        if chat_id.is_empty() {
            return;
        }

        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            token
        );

        let result = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(chat_id, "notification sent");
            }
            Ok(response) => {
                warn!(chat_id, status = %response.status(), "notification rejected");
            }
            Err(e) => {
                warn!(chat_id, "notification failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> NotifierConfig {
        NotifierConfig {
            bot_token: Some("TOKEN".to_string()),
            owner_chat_id: "1000".to_string(),
            channel_id: "-2000".to_string(),
            api_base: server.uri(),
        }
    }

    #[tokio::test]
    async fn test_owner_notification_posts_to_bot_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(serde_json::json!({ "chat_id": "1000" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(&config_for(&server));
        assert!(notifier.enabled());
        notifier.notify_owner("cleanup done").await;
    }

    #[tokio::test]
    async fn test_disabled_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = NotifierConfig {
            bot_token: None,
            api_base: server.uri(),
            owner_chat_id: "1000".to_string(),
            ..NotifierConfig::default()
        };
        let notifier = Notifier::new(&config);
        assert!(!notifier.enabled());
        notifier.notify_owner("should not send").await;
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = Notifier::new(&config_for(&server));
        // Completes without panicking or returning an error.
        notifier
            .notify_download("203.0.113.9", "abc123def456", "a.txt", 10)
            .await;
        notifier.notify_error("/api/upload", "backend down").await;
    }
}
