//! Delivery adapters: Slack incoming webhooks and stdout for dry runs.

use async_trait::async_trait;
use notewatch_core::{Block, Field, StructuredMessage};
use notewatch_http::{redact_url, HttpClient, HttpError};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Slack rejects sections with more than ten fields.
const SLACK_MAX_SECTION_FIELDS: usize = 10;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("delivery timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("writing message: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Log-safe description of the destination.
    fn describe(&self) -> String;

    async fn deliver(&self, cycle_id: Uuid, message: &StructuredMessage) -> Result<(), DeliveryError>;
}

fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn mrkdwn(text: String) -> JsonValue {
    json!({ "type": "mrkdwn", "text": text })
}

fn render_field(field: &Field) -> JsonValue {
    let mut text = format!(
        "*{}*\n`{}`",
        escape_mrkdwn(&field.label),
        escape_mrkdwn(&field.value)
    );
    if let Some(detail) = &field.detail {
        text.push_str(" — ");
        text.push_str(&escape_mrkdwn(detail));
    }
    mrkdwn(text)
}

/// Render a structured message as a Slack incoming-webhook payload.
pub fn render_slack_payload(message: &StructuredMessage) -> JsonValue {
    let mut blocks = Vec::new();
    for block in &message.blocks {
        match block {
            Block::Header { text } => blocks.push(json!({
                "type": "header",
                "text": { "type": "plain_text", "text": text, "emoji": true },
            })),
            Block::Context { items } => {
                let elements = items
                    .iter()
                    .map(|item| {
                        mrkdwn(format!(
                            "*{}:* {}",
                            escape_mrkdwn(&item.label),
                            escape_mrkdwn(&item.value)
                        ))
                    })
                    .collect::<Vec<_>>();
                blocks.push(json!({ "type": "context", "elements": elements }));
            }
            Block::Divider => blocks.push(json!({ "type": "divider" })),
            Block::Section { text, fields } => {
                let mut chunks = fields.chunks(SLACK_MAX_SECTION_FIELDS);
                let first = chunks.next().unwrap_or_default();

                let mut section = json!({ "type": "section" });
                if let Some(text) = text {
                    section["text"] = mrkdwn(escape_mrkdwn(text));
                }
                if !first.is_empty() {
                    section["fields"] = first.iter().map(render_field).collect();
                }
                blocks.push(section);

                for chunk in chunks {
                    blocks.push(json!({
                        "type": "section",
                        "fields": chunk.iter().map(render_field).collect::<Vec<_>>(),
                    }));
                }
            }
        }
    }
    json!({ "text": message.fallback, "blocks": blocks })
}

pub struct SlackWebhookNotifier {
    http: HttpClient,
    webhook_url: String,
    target: String,
}

impl SlackWebhookNotifier {
    pub fn new(http: HttpClient, webhook_url: impl Into<String>) -> Self {
        let webhook_url = webhook_url.into();
        let target = redact_url(&webhook_url);
        Self {
            http,
            webhook_url,
            target,
        }
    }
}

#[async_trait]
impl Notifier for SlackWebhookNotifier {
    fn describe(&self) -> String {
        format!("slack webhook {}", self.target)
    }

    async fn deliver(&self, cycle_id: Uuid, message: &StructuredMessage) -> Result<(), DeliveryError> {
        let payload = render_slack_payload(message);
        self.http
            .post_json(cycle_id, &self.target, &self.webhook_url, &payload)
            .await?;
        Ok(())
    }
}

/// Prints the Slack payload instead of posting it.
#[derive(Debug, Default)]
pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    fn describe(&self) -> String {
        "stdout".to_string()
    }

    async fn deliver(&self, _cycle_id: Uuid, message: &StructuredMessage) -> Result<(), DeliveryError> {
        let mut text = serde_json::to_string_pretty(&render_slack_payload(message))
            .map_err(std::io::Error::other)?;
        text.push('\n');
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> StructuredMessage {
        StructuredMessage::new("Daily Notes")
            .block(Block::Header {
                text: "Daily Notes".into(),
            })
            .block(Block::Context {
                items: vec![Field::new("UID", "612345678")],
            })
            .block(Block::Divider)
            .block(Block::Section {
                text: None,
                fields: vec![Field::new("Resin", "100/200").with_detail("32h 4m to full")],
            })
    }

    #[test]
    fn payload_uses_slack_block_kit_shapes() {
        let payload = render_slack_payload(&message());
        assert_eq!(payload["text"], "Daily Notes");

        let blocks = payload["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(blocks[0]["text"]["type"], "plain_text");
        assert_eq!(blocks[1]["elements"][0]["text"], "*UID:* 612345678");
        assert_eq!(blocks[2]["type"], "divider");
        assert_eq!(
            blocks[3]["fields"][0]["text"],
            "*Resin*\n`100/200` — 32h 4m to full"
        );
        assert!(blocks[3].get("text").is_none());
    }

    #[test]
    fn long_sections_are_split_for_slack() {
        let fields = (0..13).map(|i| Field::new(format!("f{i}"), "v")).collect();
        let message = StructuredMessage::new("x").block(Block::Section {
            text: Some("many".into()),
            fields,
        });

        let payload = render_slack_payload(&message);
        let blocks = payload["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["fields"].as_array().unwrap().len(), 10);
        assert_eq!(blocks[0]["text"]["text"], "many");
        assert_eq!(blocks[1]["fields"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn markup_characters_are_escaped() {
        let message = StructuredMessage::new("x").block(Block::Section {
            text: Some("<!channel> & co".into()),
            fields: vec![],
        });
        let payload = render_slack_payload(&message);
        assert_eq!(payload["blocks"][0]["text"]["text"], "&lt;!channel&gt; &amp; co");
        assert!(payload["blocks"][0].get("fields").is_none());
    }
}
