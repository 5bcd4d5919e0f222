//! Scripted completion service for tests.
//!
//! Replies are consumed in call order, which matches stage order inside a
//! pipeline run. Every prompt is recorded for later inspection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{ChunkStream, CompletionService, LlmError, StageChunk};
use crate::interview::stages::Stage;

#[derive(Debug, Clone)]
pub enum MockReply {
    /// Whole reply; streamed calls split it into a single chunk.
    Text(String),
    /// Reply delivered as separate chunks on streamed calls, joined on blocking calls.
    Chunks(Vec<String>),
    /// Transport fault raised when the call is made.
    Fail(String),
    /// Stream that yields the given chunks and then breaks.
    BrokenStream(Vec<String>),
    /// Stream that yields the given chunks and then never finishes.
    StalledStream(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct MockCompletionService {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(MockReply::Text(text.into()))
    }

    pub fn with_chunks(self, chunks: &[&str]) -> Self {
        self.with_reply(MockReply::Chunks(
            chunks.iter().map(|c| c.to_string()).collect(),
        ))
    }

    /// Replies for one full chain run, in stage order.
    pub fn with_full_chain(self, summary: &[&str], question: &str) -> Self {
        self.with_text(r#"{"work_experiences":[{"company":"Acme","role":"Engineer","start_date":"2020-01","end_date":"Present","description":"Built billing services in Rust"}]}"#)
            .with_text(r#"{"education":[{"institution":"MIT","degree":"BSc","field":"Computer Science","start_year":2014,"end_year":2018}]}"#)
            .with_chunks(summary)
            .with_text(r#"{"insights":["Strong backend background","Ships payment systems"]}"#)
            .with_text(format!(r#"{{"question":"{question}"}}"#))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    fn next(&self, prompt: &str) -> Result<MockReply, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Stream("mock has no scripted reply".to_string()))
    }
}

#[async_trait]
impl CompletionService for MockCompletionService {
    async fn complete(&self, prompt: &str, _system: &str) -> Result<String, LlmError> {
        match self.next(prompt)? {
            MockReply::Text(text) => Ok(text),
            MockReply::Chunks(chunks)
            | MockReply::BrokenStream(chunks)
            | MockReply::StalledStream(chunks) => Ok(chunks.concat()),
            MockReply::Fail(message) => Err(LlmError::Stream(message)),
        }
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        _system: &str,
        stage: Stage,
    ) -> Result<ChunkStream, LlmError> {
        let chunk = move |text: String| -> Result<StageChunk, LlmError> {
            Ok(StageChunk { stage, text })
        };
        match self.next(prompt)? {
            MockReply::Text(text) => Ok(Box::pin(stream::iter(vec![chunk(text)]))),
            MockReply::Chunks(chunks) => {
                Ok(Box::pin(stream::iter(chunks.into_iter().map(chunk).collect::<Vec<_>>())))
            }
            MockReply::BrokenStream(chunks) => {
                let mut items: Vec<Result<StageChunk, LlmError>> =
                    chunks.into_iter().map(chunk).collect();
                items.push(Err(LlmError::Stream("connection reset".to_string())));
                Ok(Box::pin(stream::iter(items)))
            }
            MockReply::StalledStream(chunks) => {
                let items: Vec<Result<StageChunk, LlmError>> =
                    chunks.into_iter().map(chunk).collect();
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            }
            MockReply::Fail(message) => Err(LlmError::Stream(message)),
        }
    }
}
