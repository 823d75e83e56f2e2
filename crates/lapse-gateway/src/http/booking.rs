//! Booking endpoints: create, confirm and look up a booking.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use lapse_bookings::BookingError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{error_response, request_id, ApiError, GENERIC_ERROR};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingRequest {
    #[serde(default)]
    user_id: Option<String>,
}

/// POST /booking
///
/// Returns 201 with the new booking, 400 when `userId` is missing or blank.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request_id = request_id(&headers);

    let req: CreateBookingRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!(%request_id, "malformed booking request: {e}");
        error_response(StatusCode::BAD_REQUEST, "Request body must be a JSON object")
    })?;
    let user_id = req.user_id.unwrap_or_default();
    info!(%request_id, user_id = %user_id, "booking creation requested");

    match state.bookings.create(&user_id) {
        Ok(booking) => {
            info!(%request_id, booking_id = %booking.id, "booking created");
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "success": true,
                    "message": "Booking created successfully",
                    "data": {
                        "bookingId": booking.id,
                        "status": booking.status,
                        "createdAt": booking.created_at,
                    }
                })),
            ))
        }
        Err(e) => Err(booking_error(&request_id, "creating booking", e)),
    }
}

/// PATCH /booking/{id}/confirm
///
/// 200 when confirmed (or already confirmed), 404 for an unknown id and
/// 409 when the booking was already cancelled.
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let request_id = request_id(&headers);

    match state.bookings.confirm(&id) {
        Ok(booking) => Ok(Json(json!({
            "success": true,
            "message": "Booking confirmed successfully",
            "data": {
                "id": booking.id,
                "status": booking.status,
                "updatedAt": booking.updated_at,
            }
        }))),
        Err(e) => Err(booking_error(&request_id, "confirming booking", e)),
    }
}

/// GET /booking/{id}
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let request_id = request_id(&headers);

    match state.bookings.get(&id) {
        Ok(Some(booking)) => Ok(Json(json!({ "success": true, "data": booking }))),
        Ok(None) => Err(error_response(StatusCode::NOT_FOUND, "Booking not found")),
        Err(e) => Err(booking_error(&request_id, "loading booking", e)),
    }
}

/// Map a state machine error to a status code and a client-safe body.
fn booking_error(request_id: &str, action: &str, err: BookingError) -> ApiError {
    match err {
        BookingError::Validation(msg) => {
            warn!(%request_id, "{action} rejected: {msg}");
            error_response(StatusCode::BAD_REQUEST, &msg)
        }
        BookingError::NotFound { id } => {
            warn!(%request_id, booking_id = %id, "{action}: booking not found");
            error_response(StatusCode::NOT_FOUND, "Booking not found")
        }
        BookingError::IllegalTransition { id, from, to } => {
            warn!(%request_id, booking_id = %id, %from, %to, "{action}: illegal transition");
            error_response(
                StatusCode::CONFLICT,
                &format!("Booking is {from} and cannot be {to}"),
            )
        }
        other => {
            error!(%request_id, code = other.code(), "error while {action}: {other}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR)
        }
    }
}
