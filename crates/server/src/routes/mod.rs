pub mod blocked;
pub mod course_access;
pub mod enrollment;
pub mod geoip;
pub mod health;
pub mod ip_filter;
pub mod metrics;
pub mod pages;
pub mod restricted;

use axum::http::StatusCode;
use axum::Json;
use embargo_common::EmbargoError;
use serde_json::{json, Value};

/// Map a library error onto an HTTP status and the JSON error body.
pub fn error_response(err: &EmbargoError) -> (StatusCode, Json<Value>) {
    let status = match err {
        EmbargoError::NotFound(_) => StatusCode::NOT_FOUND,
        EmbargoError::Config(_)
        | EmbargoError::InvalidIpEntry(_)
        | EmbargoError::InvalidCourseKey(_)
        | EmbargoError::InvalidCountry(_)
        | EmbargoError::UnknownAccessPoint(_)
        | EmbargoError::UnknownMessage { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "status": "error",
            "message": err.to_string()
        })),
    )
}
