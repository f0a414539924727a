use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use embargo_rules::{AccessPoint, CourseKey};
use serde_json::{json, Value};
use tracing::info;

use crate::auth::CurrentUser;
use crate::middleware::ClientIp;
use crate::routes::error_response;
use crate::state::SharedState;

/// POST /enrollment/{course_id}
///
/// Enrolls the logged-in user. Embargoed users get 403 with the URL of the
/// enrollment blocked message.
pub async fn enroll(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Path(course_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Some(user) = user else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "error", "message": "login required" })),
        );
    };

    let course: CourseKey = match course_id.parse() {
        Ok(course) => course,
        Err(e) => return error_response(&e),
    };

    if let Some(url) = state
        .policy
        .redirect_if_blocked(&course, AccessPoint::Enrollment, Some(&user), ip)
    {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "status": "error",
                "message": "enrollment in this course is restricted in your region",
                "user_message_url": url
            })),
        );
    }

    info!(course = %course, user = %user.username, "user enrolled");
    (
        StatusCode::OK,
        Json(json!({
            "status": "enrolled",
            "course_id": course.to_string(),
            "user": user.username
        })),
    )
}
