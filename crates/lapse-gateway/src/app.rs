use axum::{
    body::Body,
    extract::Request,
    routing::{get, patch, post},
    Router,
};
use lapse_bookings::BookingStateMachine;
use lapse_core::LapseConfig;
use lapse_jobs::JobQueue;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info_span;

use crate::http;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: LapseConfig,
    pub queue: Arc<JobQueue>,
    pub bookings: Arc<BookingStateMachine>,
}

impl AppState {
    pub fn new(config: LapseConfig, queue: Arc<JobQueue>, bookings: Arc<BookingStateMachine>) -> Self {
        Self {
            config,
            queue,
            bookings,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/booking", post(http::booking::create_booking))
        .route("/booking/{id}", get(http::booking::get_booking))
        .route("/booking/{id}/confirm", patch(http::booking::confirm_booking))
        .route("/jobs/due", get(http::jobs::due_jobs))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                info_span!(
                    "http_request",
                    request_id = %http::request_id(request.headers()),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .with_state(state)
}
