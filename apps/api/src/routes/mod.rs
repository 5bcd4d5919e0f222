pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::interview::handlers;
use crate::state::AppState;

/// Upper bound on resume uploads.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Interview API
        .route("/resume_question", get(handlers::handle_resume_question))
        .route("/analyze-resume", post(handlers::handle_analyze_resume))
        .route(
            "/analyze-resume-pdf",
            post(handlers::handle_analyze_resume_pdf)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/process-resume", post(handlers::handle_process_resume))
        .route("/session_state", get(handlers::handle_session_state))
        // Earlier streaming endpoint
        .route("/process_node", get(handlers::handle_process_node))
        .with_state(state)
}
