use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::chunk::CompletionChunk;
use crate::errors::BackendError;
use crate::turn::Turn;

/// Message roles understood by chat backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the ordered prompt sent to a backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        match turn {
            Turn::User { content, .. } => Self::user(content.clone()),
            Turn::Assistant { content, .. } => Self::assistant(content.clone()),
        }
    }
}

/// Sampling and limit knobs forwarded with each request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
}

/// A streaming chat-completion backend.
///
/// Implementations turn an ordered message list into a chunk stream.
/// Transcript assembly, persistence, and failure fallback all live above
/// this boundary; a backend only speaks messages in, chunks out.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Implementation name, for logging.
    fn name(&self) -> &'static str;

    /// Model identifier requests are issued against.
    fn model(&self) -> &str;

    /// Open a streaming generation over `messages`.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = CompletionChunk> + Send>>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::TokenUsage;
    use futures::StreamExt;

    struct EchoBackend;

    #[async_trait]
    impl ChatBackend for EchoBackend {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        async fn stream(
            &self,
            messages: &[ChatMessage],
            _options: &GenerationOptions,
        ) -> Result<Pin<Box<dyn Stream<Item = CompletionChunk> + Send>>, BackendError> {
            let text = messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let chunks = vec![
                CompletionChunk::Delta { text },
                CompletionChunk::Completed {
                    usage: TokenUsage::default(),
                },
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");

        let msg = ChatMessage::assistant("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn chat_message_from_turn() {
        let msg = ChatMessage::from(&Turn::user("question"));
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "question");

        let msg = ChatMessage::from(&Turn::assistant("answer", 5));
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "answer");
    }

    #[tokio::test]
    async fn trait_object_streams_chunks() {
        let backend: Box<dyn ChatBackend> = Box::new(EchoBackend);
        let messages = vec![ChatMessage::user("hi")];
        let stream = backend
            .stream(&messages, &GenerationOptions::default())
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_delta());
        assert!(chunks[1].is_terminal());
    }
}
