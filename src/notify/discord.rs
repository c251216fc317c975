//! Discord webhook notifications.

use serde::Serialize;
use tracing::{error, info};

use crate::config::model::{DiscordConfig, DiscordEvents};
use crate::error::NotificationError;
use crate::orchestrator::FailureDetail;

/// Sends notifications to Discord via webhook.
pub struct DiscordNotifier {
    /// Webhook URL.
    webhook_url: String,
    /// Event configuration.
    events: DiscordEvents,
    /// Optional user ID to mention on failures.
    mention_on_failure: Option<String>,
    /// HTTP client.
    client: reqwest::Client,
}

impl DiscordNotifier {
    /// Creates a new Discord notifier from config.
    pub fn new(config: &DiscordConfig) -> Self {
        Self {
            webhook_url: config.webhook_url.clone(),
            events: config.events.clone(),
            mention_on_failure: config.mention_on_failure.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Notifies that a video was submitted for transcoding.
    pub async fn notify_submitted(
        &self,
        file_id: &str,
        video_id: &str,
        profiles: &[String],
    ) -> Result<(), NotificationError> {
        if !self.events.on_submitted {
            return Ok(());
        }

        let embed = DiscordEmbed {
            title: "Transcode Submitted".to_string(),
            color: 0x0088FF, // Blue
            fields: vec![
                EmbedField::new("File", file_id, true),
                EmbedField::new("Video", video_id, true),
                EmbedField::new("Profiles", &profiles.join(", "), false),
            ],
        };

        self.send_embed(embed).await
    }

    /// Notifies that every output of a video has been materialized.
    pub async fn notify_materialized(
        &self,
        file_id: &str,
        video_id: &str,
        artifact_count: usize,
    ) -> Result<(), NotificationError> {
        if !self.events.on_materialized {
            return Ok(());
        }

        let embed = DiscordEmbed {
            title: "Transcode Complete".to_string(),
            color: 0x00FF00, // Green
            fields: vec![
                EmbedField::new("File", file_id, true),
                EmbedField::new("Video", video_id, true),
                EmbedField::new("Artifacts", &artifact_count.to_string(), true),
            ],
        };

        self.send_embed(embed).await
    }

    /// Notifies that a remote video or some of its encodings failed.
    pub async fn notify_transcode_failure(
        &self,
        file_id: &str,
        video_id: &str,
        failures: &[FailureDetail],
    ) -> Result<(), NotificationError> {
        if !self.events.on_transcode_failure {
            return Ok(());
        }

        let content = self.mention_on_failure.clone().unwrap_or_default();

        let mut fields = vec![
            EmbedField::new("File", file_id, true),
            EmbedField::new("Video", video_id, true),
        ];
        // Discord caps embeds at 25 fields.
        for failure in failures.iter().take(20) {
            let mut value = failure.reason.clone();
            if let Some(log_url) = &failure.log_url {
                value.push_str(&format!("\nLog: {}", log_url));
            }
            fields.push(EmbedField::new(&failure.remote_id, &truncate(&value, 1024), false));
        }

        let embed = DiscordEmbed {
            title: "Transcode Failed".to_string(),
            color: 0xFF0000, // Red
            fields,
        };

        self.send_embed_with_content(embed, &content).await
    }

    /// Sends an embed to the Discord webhook.
    async fn send_embed(&self, embed: DiscordEmbed) -> Result<(), NotificationError> {
        self.send_embed_with_content(embed, "").await
    }

    /// Sends an embed with optional content text.
    async fn send_embed_with_content(
        &self,
        embed: DiscordEmbed,
        content: &str,
    ) -> Result<(), NotificationError> {
        let payload = DiscordPayload {
            content: if content.is_empty() { None } else { Some(content.to_string()) },
            embeds: vec![embed],
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %text, "Discord webhook failed");
            return Err(NotificationError::DiscordFailed(format!(
                "HTTP {}: {}",
                status, text
            )));
        }

        info!("Discord notification sent");
        Ok(())
    }
}

/// Discord webhook payload.
#[derive(Serialize)]
struct DiscordPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

/// Discord embed structure.
#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    color: u32,
    fields: Vec<EmbedField>,
}

/// Discord embed field.
#[derive(Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

impl EmbedField {
    fn new(name: &str, value: &str, inline: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline,
        }
    }
}

/// Truncates a string to at most `max_len` bytes on a char boundary.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(url: String, events: DiscordEvents) -> DiscordNotifier {
        DiscordNotifier::new(&DiscordConfig {
            webhook_url: url,
            events,
            mention_on_failure: Some("<@123>".to_string()),
        })
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let long = "é".repeat(10);
        let cut = truncate(&long, 9);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 9);
    }

    #[tokio::test]
    async fn failure_embed_mentions_and_lists_reasons() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"content": "<@123>"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let failures = vec![FailureDetail {
            remote_id: "e1".into(),
            reason: "EncodingError: bad codec".into(),
            log_url: Some("http://s3.amazonaws.com/b/e1.log".into()),
        }];
        notifier(server.uri(), DiscordEvents::default())
            .notify_transcode_failure("f1", "v1", &failures)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_events_send_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        notifier(server.uri(), DiscordEvents::default())
            .notify_submitted("f1", "v1", &["h264".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn webhook_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad embed"))
            .mount(&server)
            .await;

        let err = notifier(server.uri(), DiscordEvents::default())
            .notify_materialized("f1", "v1", 6)
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::DiscordFailed(_)));
    }
}
