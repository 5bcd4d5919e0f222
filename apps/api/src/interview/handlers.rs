//! Axum route handlers for the interview API.

use std::convert::Infallible;

use axum::{
    extract::{Multipart, Query, State},
    http::{header, HeaderName},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::interview::engine::PipelineEventStream;
use crate::interview::schema::SessionState;
use crate::interview::store::Checkpoint;
use crate::pdf::{ensure_pdf_filename, extract_text};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    // Missing and blank ids are rejected by `require_id` with a JSON error body.
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeResumeQuery {
    #[serde(default)]
    pub id: String,
    // An empty resume is a valid run; only an absent parameter is rejected.
    #[serde(default)]
    pub resume_text: Option<String>,
}

/// Query shape of the earlier streaming endpoint.
#[derive(Debug, Deserialize)]
pub struct ProcessNodeQuery {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessResumeRequest {
    pub resume_text: String,
}

/// Always exactly one of `question` or `error`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionResponse {
    Question(String),
    Error(String),
}

fn require_id(id: &str) -> Result<&str, AppError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AppError::Validation("id cannot be empty".to_string()));
    }
    Ok(id)
}

fn require_param(value: Option<String>, name: &str) -> Result<String, AppError> {
    value.ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /resume_question?id=
///
/// Generates the next question from the session's stored insights.
/// Failures are reported as `200 {"error": ..}`.
pub async fn handle_resume_question(
    State(state): State<AppState>,
    Query(params): Query<SessionQuery>,
) -> Json<QuestionResponse> {
    let id = match require_id(&params.id) {
        Ok(id) => id,
        Err(e) => return Json(QuestionResponse::Error(e.to_string())),
    };

    match state.engine.advance_one_question(id).await {
        Ok(question) => Json(QuestionResponse::Question(question.question)),
        Err(e) => {
            warn!("resume_question failed for session {id}: {e}");
            Json(QuestionResponse::Error(e.to_string()))
        }
    }
}

/// POST /analyze-resume?id=&resume_text=
///
/// Runs the full chain and streams summary / question tokens as SSE.
pub async fn handle_analyze_resume(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeResumeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(&params.id)?.to_string();
    let resume_text = require_param(params.resume_text, "resume_text")?;
    let events = state.engine.clone().stream_resume(id, resume_text);
    Ok(event_stream(events))
}

/// GET /process_node?id=&message=
///
/// Earlier name of `/analyze-resume`, kept for existing clients.
pub async fn handle_process_node(
    State(state): State<AppState>,
    Query(params): Query<ProcessNodeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(&params.id)?.to_string();
    let message = require_param(params.message, "message")?;
    let events = state.engine.clone().stream_resume(id, message);
    Ok(event_stream(events))
}

/// POST /analyze-resume-pdf?id=  (multipart, one file field)
///
/// Extracts the upload's text, then behaves like `/analyze-resume`.
/// Non-PDF names and unreadable PDFs are rejected before any stage runs.
pub async fn handle_analyze_resume_pdf(
    State(state): State<AppState>,
    Query(params): Query<SessionQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(&params.id)?.to_string();

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        ensure_pdf_filename(&filename)?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        upload = Some((filename, data));
        break;
    }

    let (filename, data) =
        upload.ok_or_else(|| AppError::Validation("no file was uploaded".to_string()))?;
    let resume_text = extract_text(&filename, data).await?;
    info!(
        "Extracted {} chars from {filename} for session {id}",
        resume_text.len()
    );

    let events = state.engine.clone().stream_resume(id, resume_text);
    Ok(event_stream(events))
}

/// POST /process-resume?id=
///
/// Runs the full chain without streaming and returns the final state.
pub async fn handle_process_resume(
    State(state): State<AppState>,
    Query(params): Query<SessionQuery>,
    Json(request): Json<ProcessResumeRequest>,
) -> Result<Json<SessionState>, AppError> {
    let id = require_id(&params.id)?;
    let session = state
        .engine
        .process_resume(id, request.resume_text)
        .await?;
    Ok(Json(session))
}

/// GET /session_state?id=
///
/// Returns the last checkpoint written for the session.
pub async fn handle_session_state(
    State(state): State<AppState>,
    Query(params): Query<SessionQuery>,
) -> Result<Json<Checkpoint>, AppError> {
    let id = require_id(&params.id)?;
    let checkpoint = state
        .engine
        .store()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))?;
    Ok(Json(checkpoint))
}

// ────────────────────────────────────────────────────────────────────────────
// SSE plumbing
// ────────────────────────────────────────────────────────────────────────────

/// Wraps pipeline events as `data: <json>\n\n` frames. The stream ends when
/// the run ends; there is no terminal sentinel event.
fn event_stream(events: PipelineEventStream) -> impl IntoResponse {
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(sse_frames(events)),
    )
}

fn sse_frames(
    events: PipelineEventStream,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    events.map(|event| {
        Ok(Event::default().json_data(&event).unwrap_or_else(|e| {
            warn!("Failed to encode pipeline event: {e}");
            Event::default().data(r#"{"error":"failed to encode event"}"#)
        }))
    })
}
