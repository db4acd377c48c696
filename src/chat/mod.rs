pub mod anthropic;
pub mod openai;

use crate::config::Config;
use crate::conversation::{Conversation, Role};
use thiserror::Error;
use tracing::debug;

// ── Error taxonomy ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChatError {
    /// User pressed Ctrl-C while a request was in flight. The conversation is
    /// untouched; the pending user message stays at the head.
    #[error("cancelled")]
    Cancelled,
    /// The vendor answered but returned zero completion choices.
    #[error("the model returned an empty response")]
    EmptyResponse,
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

// ── Backend selection ─────────────────────────────────────────────────────────

/// The two supported vendors. Selection is by model-name prefix: anything
/// starting with "claude" talks to Anthropic, everything else to OpenAI.
pub enum Backend {
    OpenAi(openai::OpenAiClient),
    Anthropic(anthropic::AnthropicClient),
}

pub fn provide(model: &str, cfg: &Config) -> Backend {
    if model.starts_with("claude") {
        Backend::Anthropic(anthropic::AnthropicClient::new(cfg.anthropic_api_key.clone()))
    } else {
        Backend::OpenAi(openai::OpenAiClient::new(cfg.openai_api_key.clone()))
    }
}

impl Backend {
    /// Fetch the assistant reply for the current thread.
    ///
    /// In streaming mode `on_delta` fires for every text fragment as it
    /// arrives; in REST mode it fires once with the whole reply. The request
    /// races against Ctrl-C: if the interrupt wins, the in-flight call is
    /// dropped (aborting the connection) and `ChatError::Cancelled` comes
    /// back. Either way the conversation itself is never modified here.
    pub async fn retrieve(
        &self,
        conv: &Conversation,
        use_rest: bool,
        on_delta: impl Fn(&str),
    ) -> Result<String, ChatError> {
        debug!(
            rest = use_rest,
            thread_len = conv.thread_from_head().len(),
            "retrieving completion"
        );
        let request = async {
            match self {
                Backend::OpenAi(client) => {
                    if use_rest {
                        client.rest(conv, &on_delta).await
                    } else {
                        client.stream(conv, &on_delta).await
                    }
                }
                Backend::Anthropic(client) => {
                    if use_rest {
                        client.rest(conv, &on_delta).await
                    } else {
                        client.stream(conv, &on_delta).await
                    }
                }
            }
        };

        tokio::select! {
            result = request => result,
            _ = tokio::signal::ctrl_c() => {
                println!();
                Err(ChatError::Cancelled)
            }
        }
    }
}

// ── Summary generation ────────────────────────────────────────────────────────

/// Title the conversation from its most recent exchange. Convenience path:
/// any failure yields an empty string instead of an error so it can never
/// block the primary flow.
pub async fn summarize(backend: &Backend, conv: &Conversation) -> String {
    let thread = conv.thread_from_head();
    let mut recent: Vec<_> = thread
        .iter()
        .filter(|m| m.role != Role::System)
        .rev()
        .take(2)
        .collect();
    recent.reverse();
    if recent.is_empty() {
        return String::new();
    }

    let mut profile = conv.profile().clone();
    // A dice roll would end up inside the title request.
    profile.dice_roll = String::new();
    let mut scratch = Conversation::new(profile);
    scratch.append(
        Role::System,
        "Summarize the conversation below as a short title of a few words. \
         Reply with the title only.",
    );
    for m in recent {
        scratch.append(m.role, &m.content);
    }

    match backend.retrieve(&scratch, false, |_| {}).await {
        Ok(text) => trim_summary(&text),
        Err(e) => {
            debug!(error = %e, "summary generation failed");
            String::new()
        }
    }
}

fn trim_summary(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['.', '"', '\''])
        .trim_start_matches(['"', '\''])
        .trim()
        .to_string()
}

// ── SSE reassembly ────────────────────────────────────────────────────────────

/// Reassembles `data:` payloads from a server-sent-event byte stream.
/// Frames may split anywhere across network chunks, including in the middle
/// of a multi-byte character, so bytes are buffered raw and only complete
/// newline-terminated lines are decoded and emitted.
#[derive(Default)]
pub(crate) struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub fn push(&mut self, raw: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(raw);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_buffer_reassembles_split_frames() {
        let mut buf = SseBuffer::default();
        assert!(buf.push(b"data: {\"a\":").is_empty());
        let lines = buf.push(b"1}\n\ndata: {\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_sse_buffer_ignores_non_data_lines() {
        let mut buf = SseBuffer::default();
        let lines = buf.push(b"event: content_block_delta\ndata: {\"x\":1}\n: keepalive\n");
        assert_eq!(lines, vec!["{\"x\":1}"]);
    }

    #[test]
    fn test_sse_buffer_holds_unterminated_tail() {
        let mut buf = SseBuffer::default();
        assert!(buf.push(b"data: incomplete").is_empty());
        assert_eq!(buf.push(b"\n"), vec!["incomplete"]);
    }

    #[test]
    fn test_sse_buffer_multibyte_char_split_across_chunks() {
        let mut buf = SseBuffer::default();
        let frame = "data: {\"text\":\"héllo\"}\n".as_bytes();
        // Split inside the two-byte encoding of 'é'.
        let split = frame.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let (a, b) = frame.split_at(split);

        assert!(buf.push(a).is_empty());
        assert_eq!(buf.push(b), vec!["{\"text\":\"héllo\"}"]);
    }

    #[test]
    fn test_trim_summary() {
        assert_eq!(trim_summary("\"A Chat About Rust.\"\n"), "A Chat About Rust");
        assert_eq!(trim_summary("Plain title"), "Plain title");
        assert_eq!(trim_summary("Trailing dots..."), "Trailing dots");
    }

    #[test]
    fn test_provide_selects_backend_by_model_prefix() {
        let cfg = Config::default();
        assert!(matches!(
            provide("claude-sonnet-4-5", &cfg),
            Backend::Anthropic(_)
        ));
        assert!(matches!(provide("gpt-4o", &cfg), Backend::OpenAi(_)));
    }
}
