//! Interview pipeline engine.
//!
//! Chain: START → work_experience_parser → education_parser → summarizer →
//!        resume_insight → generate_question → END
//!
//! Three entry points share one long-lived engine instance:
//! - `advance_one_question`: runs only generate_question against the stored
//!   state and returns the new question.
//! - `process_resume`: runs the whole chain without streaming.
//! - `stream_resume`: runs the whole chain on a background task and yields
//!   summarizer / generate_question tokens as they arrive.
//!
//! Every completed stage is checkpointed to the session store under its name.
//! A failed or cancelled stage writes nothing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::interview::locks::SessionLocks;
use crate::interview::schema::{InterviewQuestion, SessionState};
use crate::interview::stages::{Stage, StageDescriptor, StageError};
use crate::interview::store::{SessionStore, StoreError};
use crate::llm_client::{CompletionService, LlmError, StageChunk};

/// Streamed events queued ahead of a slow client before the run pauses.
const EVENT_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("No questions available")]
    NoQuestionsAvailable,
}

/// One item of a streamed run, serialized as `{"summary": ..}`,
/// `{"question": ..}` or `{"error": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEvent {
    Summary(String),
    Question(String),
    Error(String),
}

impl PipelineEvent {
    /// Maps a chunk to its client-visible event by the chunk's stage tag.
    fn from_chunk(chunk: StageChunk) -> Option<Self> {
        match chunk.stage {
            Stage::Summarizer => Some(PipelineEvent::Summary(chunk.text)),
            Stage::GenerateQuestion => Some(PipelineEvent::Question(chunk.text)),
            _ => None,
        }
    }
}

pub type PipelineEventStream = Pin<Box<dyn Stream<Item = PipelineEvent> + Send>>;

/// Position in the stage chain.
#[derive(Debug, Clone, Copy)]
pub enum Node<'p> {
    Start,
    Stage(&'p StageDescriptor),
    End,
}

impl Node<'_> {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Node::Stage(descriptor) => Some(descriptor.stage),
            Node::Start | Node::End => None,
        }
    }
}

/// Fixed linear chain of stage descriptors.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<StageDescriptor>,
}

impl Pipeline {
    pub fn new(stages: Vec<StageDescriptor>) -> Self {
        Self { stages }
    }

    /// The resume → interview question chain.
    pub fn resume_interview() -> Self {
        Self::new(
            Stage::ALL
                .into_iter()
                .map(StageDescriptor::for_stage)
                .collect(),
        )
    }

    /// The single outgoing edge of `from`.
    pub fn transition<'p>(&'p self, from: Node<'p>) -> Node<'p> {
        let next = match from {
            Node::Start => 0,
            Node::Stage(current) => match self.position(current.stage) {
                Some(index) => index + 1,
                None => return Node::End,
            },
            Node::End => return Node::End,
        };
        self.stages.get(next).map_or(Node::End, Node::Stage)
    }

    fn position(&self, stage: Stage) -> Option<usize> {
        self.stages.iter().position(|d| d.stage == stage)
    }
}

/// Why a streamed run stopped early.
#[derive(Debug)]
enum RunError {
    /// The client went away; nothing further is sent or persisted.
    Cancelled,
    Failed(PipelineError),
}

impl From<PipelineError> for RunError {
    fn from(e: PipelineError) -> Self {
        RunError::Failed(e)
    }
}

impl From<StageError> for RunError {
    fn from(e: StageError) -> Self {
        RunError::Failed(e.into())
    }
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        RunError::Failed(e.into())
    }
}

/// Long-lived pipeline engine, built once at startup and shared by handlers.
pub struct InterviewEngine {
    llm: Arc<dyn CompletionService>,
    store: Arc<dyn SessionStore>,
    pipeline: Pipeline,
    locks: SessionLocks,
    call_timeout: Duration,
}

impl InterviewEngine {
    pub fn new(
        llm: Arc<dyn CompletionService>,
        store: Arc<dyn SessionStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            store,
            pipeline: Pipeline::resume_interview(),
            locks: SessionLocks::new(),
            call_timeout,
        }
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Generates one more question for `session_key` from its stored insights.
    ///
    /// Upstream stages are not re-run; a session that never went through the
    /// full chain is treated as the empty default state.
    pub async fn advance_one_question(
        &self,
        session_key: &str,
    ) -> Result<InterviewQuestion, PipelineError> {
        let span = info_span!("advance", run_id = %Uuid::new_v4(), session = session_key);
        self.advance(session_key).instrument(span).await
    }

    async fn advance(&self, session_key: &str) -> Result<InterviewQuestion, PipelineError> {
        let _guard = self.locks.acquire(session_key).await;

        let state = self.store.load(session_key).await?;
        let previous = state.interview_question_list.len();

        let descriptor = StageDescriptor::for_stage(Stage::GenerateQuestion);
        let state = self.run_stage(&descriptor, state).await?;
        self.store
            .put(session_key, &state, Stage::GenerateQuestion)
            .await?;

        info!(
            questions = state.interview_question_list.len(),
            previous, "question generated"
        );
        state
            .latest_question()
            .cloned()
            .ok_or(PipelineError::NoQuestionsAvailable)
    }

    /// Runs the full chain for `resume_text` without streaming and returns
    /// the final state.
    pub async fn process_resume(
        &self,
        session_key: &str,
        resume_text: String,
    ) -> Result<SessionState, PipelineError> {
        let span = info_span!("process", run_id = %Uuid::new_v4(), session = session_key);
        self.process(session_key, resume_text).instrument(span).await
    }

    async fn process(
        &self,
        session_key: &str,
        resume_text: String,
    ) -> Result<SessionState, PipelineError> {
        let _guard = self.locks.acquire(session_key).await;
        let mut state = self.seed(session_key, resume_text).await?;

        let mut node = self.pipeline.transition(Node::Start);
        while let Node::Stage(descriptor) = node {
            let started = Instant::now();
            state = self.run_stage(descriptor, state).await?;
            self.checkpoint(session_key, &state, descriptor.stage, started)
                .await?;
            node = self.pipeline.transition(node);
            debug!(next = ?node.stage(), "transition");
        }
        Ok(state)
    }

    /// Runs the full chain on a background task, exposing the summarizer and
    /// generate_question token streams. A failure ends the stream with one
    /// error event; dropping the stream cancels the run.
    pub fn stream_resume(
        self: Arc<Self>,
        session_key: String,
        resume_text: String,
    ) -> PipelineEventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let span = info_span!("stream", run_id = %Uuid::new_v4(), session = %session_key);

        tokio::spawn(
            async move {
                match self.drive_stream(&session_key, resume_text, &tx).await {
                    Ok(()) => debug!("streamed run complete"),
                    Err(RunError::Cancelled) => info!("client disconnected, run cancelled"),
                    Err(RunError::Failed(e)) => {
                        warn!("streamed run failed: {e}");
                        let _ = tx.send(PipelineEvent::Error(e.to_string())).await;
                    }
                }
            }
            .instrument(span),
        );

        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        }))
    }

    async fn drive_stream(
        &self,
        session_key: &str,
        resume_text: String,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<(), RunError> {
        let _guard = unless_cancelled(tx, async {
            Ok::<_, RunError>(self.locks.acquire(session_key).await)
        })
        .await?;
        let mut state = self.seed(session_key, resume_text).await?;

        let mut node = self.pipeline.transition(Node::Start);
        while let Node::Stage(descriptor) = node {
            let started = Instant::now();
            state = if descriptor.streams {
                self.run_stage_streamed(descriptor, state, tx).await?
            } else {
                unless_cancelled(tx, async {
                    self.run_stage(descriptor, state)
                        .await
                        .map_err(RunError::from)
                })
                .await?
            };
            self.checkpoint(session_key, &state, descriptor.stage, started)
                .await?;
            node = self.pipeline.transition(node);
            debug!(next = ?node.stage(), "transition");
        }
        Ok(())
    }

    /// Fresh state for a new resume run. The question history is carried
    /// over so the session's list stays append-only.
    async fn seed(
        &self,
        session_key: &str,
        resume_text: String,
    ) -> Result<SessionState, StoreError> {
        let previous = self.store.load(session_key).await?;
        let mut state = SessionState::from_resume(resume_text);
        state.interview_question_list = previous.interview_question_list;
        Ok(state)
    }

    async fn checkpoint(
        &self,
        session_key: &str,
        state: &SessionState,
        stage: Stage,
        started: Instant,
    ) -> Result<(), StoreError> {
        let checkpoint = self.store.put(session_key, state, stage).await?;
        info!(
            %stage,
            step = checkpoint.step,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage complete"
        );
        Ok(())
    }

    async fn run_stage(
        &self,
        descriptor: &StageDescriptor,
        state: SessionState,
    ) -> Result<SessionState, StageError> {
        let stage = descriptor.stage;
        debug!(%stage, "stage started");
        let prompt = (descriptor.prompt)(&state);

        let raw = self
            .with_timeout(self.llm.complete(&prompt.text, prompt.system))
            .await
            .map_err(|source| StageError::Transport { stage, source })?;

        (descriptor.apply)(state, &raw)
    }

    async fn run_stage_streamed(
        &self,
        descriptor: &StageDescriptor,
        state: SessionState,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<SessionState, RunError> {
        let stage = descriptor.stage;
        debug!(%stage, "stage started (streamed)");
        let transport =
            move |source: LlmError| RunError::from(StageError::Transport { stage, source });
        let prompt = (descriptor.prompt)(&state);

        let mut chunks = unless_cancelled(tx, async {
            self.with_timeout(self.llm.complete_stream(&prompt.text, prompt.system, stage))
                .await
                .map_err(transport)
        })
        .await?;

        let mut output = String::new();
        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(self.call_timeout, chunks.next()) => next,
                _ = tx.closed() => return Err(RunError::Cancelled),
            };
            let chunk = match next {
                Err(_) => return Err(transport(self.timeout_error())),
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(transport(e)),
                Ok(Some(Ok(chunk))) => chunk,
            };

            output.push_str(&chunk.text);
            if let Some(event) = PipelineEvent::from_chunk(chunk) {
                if tx.send(event).await.is_err() {
                    return Err(RunError::Cancelled);
                }
            }
        }

        Ok((descriptor.apply)(state, &output)?)
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, LlmError>>,
    ) -> Result<T, LlmError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or_else(|_| Err(self.timeout_error()))
    }

    fn timeout_error(&self) -> LlmError {
        LlmError::Timeout {
            secs: self.call_timeout.as_secs(),
        }
    }
}

/// Races `work` against the client going away.
async fn unless_cancelled<T>(
    tx: &mpsc::Sender<PipelineEvent>,
    work: impl Future<Output = Result<T, RunError>>,
) -> Result<T, RunError> {
    tokio::select! {
        result = work => result,
        _ = tx.closed() => Err(RunError::Cancelled),
    }
}
