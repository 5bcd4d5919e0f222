use std::sync::Arc;

use crate::interview::engine::InterviewEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Built once at startup; holds the completion client and session store.
    pub engine: Arc<InterviewEngine>,
}
