use std::net::IpAddr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use embargo_common::EmbargoError;
use embargo_rules::CourseKey;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::routes::error_response;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct CourseAccessQuery {
    /// Comma separated course keys.
    pub course_ids: String,
    /// Username whose profile country should be checked.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// GET /api/embargo/v1/course_access/
///
/// Reports whether the given user and address may access every listed
/// course. Used by other services, so it is never embargoed itself.
pub async fn course_access(
    State(state): State<SharedState>,
    Query(query): Query<CourseAccessQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let courses = query
        .course_ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::parse::<CourseKey>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| error_response(&e))?;
    if courses.is_empty() {
        return Err(error_response(&EmbargoError::InvalidCourseKey(
            "course_ids is empty".to_string(),
        )));
    }

    let user = match query.user.as_deref().filter(|u| !u.is_empty()) {
        Some(username) => Some(state.users.get(username).ok_or_else(|| {
            error_response(&EmbargoError::NotFound(format!("user {username}")))
        })?),
        None => None,
    };

    let ip = match query.ip_address.as_deref().filter(|ip| !ip.is_empty()) {
        Some(raw) => Some(raw.parse::<IpAddr>().map_err(|_| {
            error_response(&EmbargoError::InvalidIpEntry(raw.to_string()))
        })?),
        None => None,
    };

    let access = courses
        .iter()
        .all(|course| state.policy.check_course_access(course, user.as_ref(), ip));

    Ok(Json(json!({ "access": access })))
}
