use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use super::{ChatError, SseBuffer};
use crate::conversation::Conversation;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
        }
    }

    /// One blocking request; the first choice's text is the reply.
    pub async fn rest(
        &self,
        conv: &Conversation,
        on_delta: &impl Fn(&str),
    ) -> Result<String, ChatError> {
        let body = build_body(conv, false);
        let resp = self
            .http
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Api { status, body });
        }

        let parsed: ChatResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ChatError::EmptyResponse)?;
        on_delta(&text);
        Ok(text)
    }

    /// Server-push streaming; deltas are echoed through `on_delta` as they
    /// arrive and concatenated into the returned reply.
    pub async fn stream(
        &self,
        conv: &Conversation,
        on_delta: &impl Fn(&str),
    ) -> Result<String, ChatError> {
        let body = build_body(conv, true);
        let resp = self
            .http
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Api { status, body });
        }

        let mut stream = resp.bytes_stream();
        let mut sse = SseBuffer::default();
        let mut data = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            for payload in sse.push(&bytes) {
                if payload == "[DONE]" {
                    continue;
                }
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(&payload) else {
                    continue;
                };
                for choice in chunk.choices.unwrap_or_default() {
                    if let Some(text) = choice.delta.and_then(|d| d.content) {
                        on_delta(&text);
                        data.push_str(&text);
                    }
                }
            }
        }

        Ok(data)
    }
}

// ── Request body ──────────────────────────────────────────────────────────────

/// The OpenAI backend honours the full custom-parameter set. Zero values mean
/// "unset" and are left out of the request.
fn build_body(conv: &Conversation, stream: bool) -> Value {
    let profile = conv.profile();
    let params = &profile.custom_parameters;

    let messages: Vec<Value> = conv
        .thread_from_head()
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": profile.model,
        "messages": messages,
        "stream": stream,
    });

    if !profile.response_format.is_empty() {
        body["response_format"] = serde_json::json!({ "type": profile.response_format });
    }

    if params.max_tokens != 0 {
        body["max_tokens"] = params.max_tokens.into();
    }
    if params.temperature != 0.0 {
        body["temperature"] = serde_json::json!(params.temperature);
    }
    if params.top_p != 0.0 {
        body["top_p"] = serde_json::json!(params.top_p);
    }
    if !params.stop.is_empty() {
        body["stop"] = serde_json::json!(params.stop);
    }
    if params.presence_penalty != 0.0 {
        body["presence_penalty"] = serde_json::json!(params.presence_penalty);
    }
    if params.frequency_penalty != 0.0 {
        body["frequency_penalty"] = serde_json::json!(params.frequency_penalty);
    }
    if !params.logit_bias.is_empty() {
        body["logit_bias"] = serde_json::json!(params.logit_bias);
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::conversation::Role;

    fn conv_with_params() -> Conversation {
        let mut profile = Profile::default();
        profile.custom_parameters.max_tokens = 256;
        profile.custom_parameters.temperature = 0.5;
        profile.custom_parameters.stop = vec!["END".to_string()];
        let mut conv = Conversation::new(profile);
        conv.append(Role::System, "seed");
        conv.append(Role::User, "hi");
        conv
    }

    #[test]
    fn test_build_body_includes_thread_and_params() {
        let body = build_body(&conv_with_params(), true);

        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stop"][0], "END");
        assert_eq!(body["response_format"]["type"], "text");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hi");
    }

    #[test]
    fn test_build_body_omits_unset_params() {
        let mut conv = Conversation::new(Profile::default());
        conv.append(Role::User, "hi");
        let body = build_body(&conv, false);

        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
        assert!(body.get("logit_bias").is_none());
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"hel"},"finish_reason":null}]}"#,
        )
        .unwrap();
        let text = chunk.choices.unwrap()[0]
            .delta
            .as_ref()
            .and_then(|d| d.content.clone());
        assert_eq!(text.as_deref(), Some("hel"));
    }
}
