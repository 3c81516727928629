use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::Stream;
use parking_lot::Mutex;

use reprise_core::backend::{ChatBackend, ChatMessage, GenerationOptions};
use reprise_core::chunk::CompletionChunk;
use reprise_core::errors::BackendError;
use reprise_core::tokens::TokenUsage;

/// A scripted stand-in for a real chat backend. Each `stream` call
/// consumes the next entry of the script.
pub enum MockResponse {
    /// Emit these chunks in order.
    Stream(Vec<CompletionChunk>),
    /// Fail the `stream` call itself.
    Error(BackendError),
    /// Sleep, then act as the wrapped response.
    Delay {
        after: Duration,
        then: Box<MockResponse>,
    },
}

impl MockResponse {
    /// One delta carrying `text`, then a completion charging `tokens`
    /// completion tokens.
    pub fn stream_text(text: &str, tokens: u64) -> Self {
        Self::Stream(vec![
            CompletionChunk::Delta {
                text: text.to_string(),
            },
            CompletionChunk::Completed {
                usage: TokenUsage::new(0, tokens),
            },
        ])
    }

    /// A stream whose only chunk is an error marker.
    pub fn stream_error(error: &BackendError) -> Self {
        Self::Stream(vec![CompletionChunk::Error {
            error: error.into(),
        }])
    }

    pub fn delayed(after: Duration, then: MockResponse) -> Self {
        Self::Delay {
            after,
            then: Box::new(then),
        }
    }

    // Nested delays unwind iteratively; async recursion would need boxing.
    async fn into_stream(
        self,
    ) -> Result<Pin<Box<dyn Stream<Item = CompletionChunk> + Send>>, BackendError> {
        let mut next = self;
        loop {
            match next {
                MockResponse::Stream(chunks) => return Ok(Box::pin(stream::iter(chunks))),
                MockResponse::Error(error) => return Err(error),
                MockResponse::Delay { after, then } => {
                    tokio::time::sleep(after).await;
                    next = *then;
                }
            }
        }
    }
}

/// Backend double driven by a [`MockResponse`] script. Records every
/// prompt it is handed so tests can assert on transcript assembly.
pub struct MockBackend {
    script: Mutex<VecDeque<MockResponse>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockBackend {
    pub fn new(script: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Prompts seen so far, oldest first.
    pub fn captured_messages(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-v0"
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        _options: &GenerationOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = CompletionChunk> + Send>>, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(messages.to_vec());

        let next = self.script.lock().pop_front().ok_or_else(|| {
            BackendError::InvalidRequest(format!("mock script ran dry on call {call}"))
        })?;

        next.into_stream().await
    }
}
