use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use super::{error_response, ApiError, GENERIC_ERROR};
use crate::app::AppState;

/// GET /jobs/due: jobs the next tick would pick up.
pub async fn due_jobs(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let jobs = state.queue.get_due_jobs().map_err(|e| {
        error!("listing due jobs failed: {e}");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR)
    })?;
    Ok(Json(json!({ "count": jobs.len(), "jobs": jobs })))
}
