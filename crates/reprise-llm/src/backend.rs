use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::instrument;

use reprise_core::backend::{ChatBackend, ChatMessage, GenerationOptions};
use reprise_core::chunk::{BackendErrorInfo, CompletionChunk};
use reprise_core::config::AppConfig;
use reprise_core::errors::BackendError;

use crate::sse::{self, SseParser};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(75);

/// Streaming client for an OpenAI-style `/chat/completions` endpoint.
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiBackend {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("static client config cannot fail to build"),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> reqwest::RequestBuilder {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            stream_options: StreamOptionsBody {
                include_usage: true,
            },
            temperature: options.temperature,
            max_tokens: options.max_output_tokens,
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }
        req
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, messages, options), fields(model = %self.model))]
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = CompletionChunk> + Send>>, BackendError> {
        let resp = self
            .build_request(messages, options)
            .send()
            .await
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), body));
        }

        Ok(Box::pin(SseStream::new(resp.bytes_stream())))
    }
}

// --- Request body ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    stream_options: StreamOptionsBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct StreamOptionsBody {
    include_usage: bool,
}

/// Wraps a byte stream from reqwest and yields completion chunks.
///
/// Enforces an idle timeout between reads: the deadline resets whenever
/// bytes arrive, and if it fires a terminal timeout error chunk is emitted.
/// Bytes are buffered until a full SSE frame is available, so UTF-8
/// sequences split across reads are reassembled before decoding.
struct SseStream {
    upstream: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    buffer: Vec<u8>,
    ready: Vec<CompletionChunk>,
    deadline: Pin<Box<tokio::time::Sleep>>,
    idle: Duration,
    done: bool,
}

impl SseStream {
    fn new(
        upstream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self::with_idle(upstream, STREAM_IDLE_TIMEOUT)
    }

    fn with_idle(
        upstream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle: Duration,
    ) -> Self {
        Self {
            upstream: Box::pin(upstream),
            parser: SseParser::new(),
            buffer: Vec::new(),
            ready: Vec::new(),
            deadline: Box::pin(tokio::time::sleep(idle)),
            idle,
            done: false,
        }
    }

    fn rearm(&mut self) {
        let next = tokio::time::Instant::now() + self.idle;
        self.deadline.as_mut().reset(next);
    }

    /// Buffer raw bytes and parse every complete frame out of them.
    fn ingest(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&frame).into_owned();
            self.parse_into_ready(&text);
        }
    }

    /// Parse whatever is left in the buffer once upstream closes.
    fn flush_tail(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let tail = std::mem::take(&mut self.buffer);
        self.parse_into_ready(&String::from_utf8_lossy(&tail));
    }

    fn parse_into_ready(&mut self, text: &str) {
        for data in sse::parse_sse_lines(text) {
            let chunks = self.parser.parse_data(data);
            self.ready.extend(chunks);
        }
    }

    /// Pop the next parsed chunk. A terminal chunk closes the stream.
    fn pop_ready(&mut self) -> Option<CompletionChunk> {
        if self.ready.is_empty() {
            return None;
        }
        let chunk = self.ready.remove(0);
        if chunk.is_terminal() {
            self.done = true;
            self.ready.clear();
        }
        Some(chunk)
    }
}

impl Stream for SseStream {
    type Item = CompletionChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(chunk) = this.pop_ready() {
            return Poll::Ready(Some(chunk));
        }
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.upstream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.rearm();
                    this.ingest(&bytes);
                    if let Some(chunk) = this.pop_ready() {
                        return Poll::Ready(Some(chunk));
                    }
                }
                Poll::Ready(Some(Err(error))) => {
                    this.done = true;
                    let failure = BackendError::StreamInterrupted(error.to_string());
                    return Poll::Ready(Some(CompletionChunk::Error {
                        error: BackendErrorInfo::from(&failure),
                    }));
                }
                Poll::Ready(None) => {
                    // Upstream closed; whatever parses out of the tail is
                    // the last of it. Ending without a terminal chunk is
                    // how the consumer detects an early close.
                    this.done = true;
                    this.flush_tail();
                    return Poll::Ready(this.pop_ready());
                }
                Poll::Pending => {
                    if this.deadline.as_mut().poll(cx).is_ready() {
                        this.done = true;
                        let failure = BackendError::Timeout(this.idle);
                        return Poll::Ready(Some(CompletionChunk::Error {
                            error: BackendErrorInfo::from(&failure),
                        }));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
