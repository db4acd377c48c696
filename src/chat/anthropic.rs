use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use super::{ChatError, SseBuffer};
use crate::conversation::{Conversation, Role};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
/// This backend sends a fixed parameter set: model + max_tokens.
const MAX_TOKENS: u32 = 4096;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<EventDelta>,
}

#[derive(Debug, Deserialize)]
struct EventDelta {
    text: Option<String>,
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
        }
    }

    pub async fn rest(
        &self,
        conv: &Conversation,
        on_delta: &impl Fn(&str),
    ) -> Result<String, ChatError> {
        let body = build_body(conv, false);
        let resp = self.send(&body).await?;

        let parsed: MessageResponse = resp.json().await?;
        let text = parsed
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .ok_or(ChatError::EmptyResponse)?;
        on_delta(&text);
        Ok(text)
    }

    pub async fn stream(
        &self,
        conv: &Conversation,
        on_delta: &impl Fn(&str),
    ) -> Result<String, ChatError> {
        let body = build_body(conv, true);
        let resp = self.send(&body).await?;

        let mut stream = resp.bytes_stream();
        let mut sse = SseBuffer::default();
        let mut data = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            for payload in sse.push(&bytes) {
                let Ok(event) = serde_json::from_str::<StreamEvent>(&payload) else {
                    continue;
                };
                if event.kind == "content_block_delta" {
                    if let Some(text) = event.delta.and_then(|d| d.text) {
                        on_delta(&text);
                        data.push_str(&text);
                    }
                }
            }
        }

        Ok(data)
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ChatError> {
        let resp = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Api { status, body });
        }
        Ok(resp)
    }
}

// ── Request body ──────────────────────────────────────────────────────────────

/// Anthropic carries system content in a top-level field; system-role
/// messages never appear in the wire message list.
fn build_body(conv: &Conversation, stream: bool) -> Value {
    let thread = conv.thread_from_head();

    let system = thread
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let messages: Vec<Value> = thread
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        })
        .collect();

    serde_json::json!({
        "model": conv.profile().model,
        "max_tokens": MAX_TOKENS,
        "system": system,
        "messages": messages,
        "stream": stream,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    #[test]
    fn test_build_body_hoists_system_content() {
        let mut profile = Profile::default();
        profile.model = "claude-sonnet-4-5".to_string();
        // Sampling parameters are an OpenAI-only concern.
        profile.custom_parameters.temperature = 0.9;

        let mut conv = Conversation::new(profile);
        conv.append(Role::System, "be brief");
        conv.append(Role::User, "hi");
        conv.append(Role::Assistant, "hello");

        let body = build_body(&conv, false);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["max_tokens"], MAX_TOKENS);
        assert!(body.get("temperature").is_none());

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m["role"] != "system"));
    }

    #[test]
    fn test_stream_event_parsing() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, "content_block_delta");
        assert_eq!(event.delta.unwrap().text.as_deref(), Some("hi"));

        let stop: StreamEvent = serde_json::from_str(r#"{"type":"message_stop"}"#).unwrap();
        assert_eq!(stop.kind, "message_stop");
        assert!(stop.delta.is_none());
    }
}
