pub mod booking;
pub mod health;
pub mod jobs;

use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

/// Message returned for every unexpected failure; details only go to the log.
pub const GENERIC_ERROR: &str = "Something went wrong. Please try again later.";

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, Json<Value>);

pub fn error_response(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "success": false, "error": message })))
}

/// Caller-supplied correlation id, or `N/A`.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("N/A")
        .to_string()
}
