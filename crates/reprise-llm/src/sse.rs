use serde::Deserialize;

use reprise_core::chunk::{BackendErrorInfo, CompletionChunk};
use reprise_core::tokens::TokenUsage;

/// Marker payload sent after the last data chunk of a stream.
const DONE_MARKER: &str = "[DONE]";

/// State machine for parsing OpenAI-style `chat.completions` stream payloads.
///
/// Token usage arrives in its own payload near the end of the stream (we
/// request it via `stream_options.include_usage`), so the parser holds it
/// until the `[DONE]` marker and only then emits `Completed`. After a
/// terminal chunk has been produced, further payloads are ignored.
pub struct SseParser {
    usage: Option<TokenUsage>,
    finished: bool,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            usage: None,
            finished: false,
        }
    }

    /// Parse a single `data:` payload and return zero or more chunks.
    pub fn parse_data(&mut self, data: &str) -> Vec<CompletionChunk> {
        if self.finished {
            return Vec::new();
        }

        if data.trim() == DONE_MARKER {
            self.finished = true;
            let usage = match self.usage.take() {
                Some(usage) => usage,
                None => {
                    tracing::warn!("stream closed without a usage payload");
                    TokenUsage::default()
                }
            };
            return vec![CompletionChunk::Completed { usage }];
        }

        let payload: ChunkPayload = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "skipping unparseable stream payload");
                return Vec::new();
            }
        };

        if let Some(err) = payload.error {
            self.finished = true;
            let error = classify_error(&err);
            return vec![CompletionChunk::Error { error }];
        }

        if let Some(usage) = payload.usage {
            self.usage = Some(TokenUsage::new(
                usage.prompt_tokens,
                usage.completion_tokens,
            ));
        }

        payload
            .choices
            .into_iter()
            .filter_map(|choice| choice.delta.content)
            .filter(|text| !text.is_empty())
            .map(|text| CompletionChunk::Delta { text })
            .collect()
    }
}

fn classify_error(err: &ErrorPayload) -> BackendErrorInfo {
    let kind = match err.error_type.as_deref() {
        Some("authentication_error") => "authentication_failed",
        Some("invalid_request_error") => "invalid_request",
        Some("rate_limit_error") | Some("insufficient_quota") => "rate_limited",
        Some("overloaded_error") => "overloaded",
        _ => "server_error",
    };
    BackendErrorInfo {
        kind: kind.to_string(),
        message: err.message.clone(),
    }
}

/// Extract the `data:` payloads from a raw SSE frame.
///
/// OpenAI streams carry everything in `data:` lines; `event:`, `id:` and
/// comment lines are ignored.
pub fn parse_sse_lines(raw: &str) -> Vec<&str> {
    raw.lines()
        .filter_map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            line.strip_prefix("data:")
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        })
        .filter(|data| !data.is_empty())
        .collect()
}

// --- Deserialization types for chat.completions stream payloads ---

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChoicePayload>,
    #[serde(default)]
    usage: Option<UsagePayload>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Deserialize)]
struct ChoicePayload {
    #[serde(default)]
    delta: DeltaPayload,
}

#[derive(Deserialize, Default)]
struct DeltaPayload {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_text_stream() {
        let mut parser = SseParser::new();

        let chunks = parser.parse_data(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":"He"}}]}"#,
        );
        assert_eq!(chunks, vec![CompletionChunk::Delta { text: "He".into() }]);

        let chunks = parser.parse_data(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"llo"}}]}"#,
        );
        assert_eq!(chunks, vec![CompletionChunk::Delta { text: "llo".into() }]);

        // Usage payload is held back until the done marker.
        let chunks = parser.parse_data(
            r#"{"id":"chatcmpl-1","choices":[],"usage":{"prompt_tokens":2,"completion_tokens":3}}"#,
        );
        assert!(chunks.is_empty());

        let chunks = parser.parse_data("[DONE]");
        assert_eq!(chunks.len(), 1);
        if let CompletionChunk::Completed { usage } = &chunks[0] {
            assert_eq!(usage.prompt_tokens, 2);
            assert_eq!(usage.completion_tokens, 3);
        } else {
            panic!("expected Completed");
        }
    }

    #[test]
    fn done_without_usage_completes_with_zero() {
        let mut parser = SseParser::new();
        parser.parse_data(r#"{"choices":[{"delta":{"content":"hi"}}]}"#);
        let chunks = parser.parse_data("[DONE]");
        if let CompletionChunk::Completed { usage } = &chunks[0] {
            assert_eq!(usage.total(), 0);
        } else {
            panic!("expected Completed");
        }
    }

    #[test]
    fn empty_and_missing_content_deltas_are_dropped() {
        let mut parser = SseParser::new();
        let chunks =
            parser.parse_data(r#"{"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#);
        assert!(chunks.is_empty());
        let chunks = parser.parse_data(r#"{"choices":[{"delta":{"content":""}}]}"#);
        assert!(chunks.is_empty());
    }

    #[test]
    fn parse_error_payload() {
        let mut parser = SseParser::new();
        let chunks = parser.parse_data(
            r#"{"error":{"type":"rate_limit_error","message":"too many requests"}}"#,
        );
        assert_eq!(chunks.len(), 1);
        if let CompletionChunk::Error { error } = &chunks[0] {
            assert_eq!(error.kind, "rate_limited");
            assert_eq!(error.message, "too many requests");
        } else {
            panic!("expected Error");
        }
    }

    #[test]
    fn unknown_error_type_maps_to_server_error() {
        let mut parser = SseParser::new();
        let chunks = parser.parse_data(r#"{"error":{"message":"boom"}}"#);
        assert!(
            matches!(&chunks[0], CompletionChunk::Error { error } if error.kind == "server_error")
        );
    }

    #[test]
    fn payloads_after_terminal_are_ignored() {
        let mut parser = SseParser::new();
        parser.parse_data(r#"{"error":{"type":"overloaded_error","message":"busy"}}"#);
        let chunks = parser.parse_data(r#"{"choices":[{"delta":{"content":"late"}}]}"#);
        assert!(chunks.is_empty());
        assert!(parser.parse_data("[DONE]").is_empty());
    }

    #[test]
    fn malformed_payload_is_skipped() {
        let mut parser = SseParser::new();
        assert!(parser.parse_data("{not json").is_empty());
        // Parser keeps going afterwards.
        let chunks = parser.parse_data(r#"{"choices":[{"delta":{"content":"ok"}}]}"#);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn parse_sse_lines_basic() {
        let raw = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n";
        let lines = parse_sse_lines(raw);
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn parse_sse_lines_ignores_non_data_fields() {
        let raw = ": keep-alive\nevent: ping\nid: 7\ndata: [DONE]\n\n";
        let lines = parse_sse_lines(raw);
        assert_eq!(lines, vec!["[DONE]"]);
    }

    #[test]
    fn parse_sse_lines_handles_crlf() {
        let raw = "data: {\"a\":1}\r\n\r\n";
        assert_eq!(parse_sse_lines(raw), vec!["{\"a\":1}"]);
    }
}
