use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use embargo_common::{EmbargoError, RuleType};
use embargo_rules::{Country, CourseKey, RestrictedCourse};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::StaffUser;
use crate::routes::error_response;
use crate::state::SharedState;

type ApiResult = Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)>;

fn parse_course(course_id: &str) -> Result<CourseKey, (StatusCode, Json<Value>)> {
    course_id.parse().map_err(|e: EmbargoError| error_response(&e))
}

/// GET /api/embargo/restricted-courses
pub async fn list_courses(_staff: StaffUser, State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "courses": state.policy.restrictions().list_courses() }))
}

/// POST /api/embargo/restricted-courses
///
/// Creates or updates a restricted course. Existing country rules are kept.
pub async fn save_course(
    _staff: StaffUser,
    State(state): State<SharedState>,
    Json(course): Json<RestrictedCourse>,
) -> ApiResult {
    let key = course.course_key.clone();
    state
        .policy
        .restrictions()
        .upsert_course(course)
        .map_err(|e| error_response(&e))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "saved", "course_id": key.to_string() })),
    ))
}

/// DELETE /api/embargo/restricted-courses/{course_id}
///
/// Legacy slash course ids must be percent-encoded in the path.
pub async fn delete_course(
    _staff: StaffUser,
    State(state): State<SharedState>,
    Path(course_id): Path<String>,
) -> ApiResult {
    let key = parse_course(&course_id)?;
    let removed = state
        .policy
        .restrictions()
        .remove_course(&key)
        .map_err(|e| error_response(&e))?;
    Ok((
        StatusCode::OK,
        Json(json!({ "status": "deleted", "course": removed })),
    ))
}

/// Request body for adding a country rule.
#[derive(Debug, Deserialize)]
pub struct CountryRuleRequest {
    pub country: Country,
    pub rule_type: RuleType,
}

/// POST /api/embargo/restricted-courses/{course_id}/rules
pub async fn set_rule(
    _staff: StaffUser,
    State(state): State<SharedState>,
    Path(course_id): Path<String>,
    Json(body): Json<CountryRuleRequest>,
) -> ApiResult {
    let key = parse_course(&course_id)?;
    let rule = state
        .policy
        .restrictions()
        .set_rule(&key, body.country, body.rule_type)
        .map_err(|e| error_response(&e))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "saved", "rule": rule })),
    ))
}

/// DELETE /api/embargo/restricted-courses/{course_id}/rules/{country}
pub async fn delete_rule(
    _staff: StaffUser,
    State(state): State<SharedState>,
    Path((course_id, country)): Path<(String, String)>,
) -> ApiResult {
    let key = parse_course(&course_id)?;
    let country: Country = country
        .parse()
        .map_err(|e: EmbargoError| error_response(&e))?;
    state
        .policy
        .restrictions()
        .remove_rule(&key, &country)
        .map_err(|e| error_response(&e))?;
    Ok((
        StatusCode::OK,
        Json(json!({ "status": "deleted", "course_id": key.to_string(), "country": country })),
    ))
}

/// POST /api/embargo/cache/clear
pub async fn clear_cache(StaffUser(staff): StaffUser, State(state): State<SharedState>) -> Json<Value> {
    state.policy.restrictions().clear_cache();
    info!(by = %staff.username, "embargo caches cleared");
    Json(json!({ "status": "cleared" }))
}

/// Request body for switching the embargo feature.
#[derive(Debug, Deserialize)]
pub struct FeatureRequest {
    pub enabled: bool,
}

/// PUT /api/embargo/feature
pub async fn set_feature(
    StaffUser(staff): StaffUser,
    State(state): State<SharedState>,
    Json(body): Json<FeatureRequest>,
) -> Json<Value> {
    state.policy.set_enabled(body.enabled);
    state
        .config
        .write()
        .expect("config lock poisoned")
        .features
        .embargo = body.enabled;
    info!(by = %staff.username, enabled = body.enabled, "embargo feature updated via admin API");
    Json(json!({ "status": "updated", "enabled": body.enabled }))
}
