use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};

use crate::auth::StaffUser;
use crate::state::SharedState;

/// GET /api/metrics
///
/// Prometheus text exposition of the embargo counters.
pub async fn get_metrics(State(state): State<SharedState>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode prometheus metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response();
    }

    (
        [(CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// GET /api/embargo/stats
///
/// JSON summary of the counters for the staff dashboard.
pub async fn get_stats(_staff: StaffUser, State(state): State<SharedState>) -> Json<Value> {
    let blocked = &state.metrics.requests_blocked;
    let by_ip = blocked.with_label_values(&["ip_blacklisted"]).get();
    let by_country = blocked.with_label_values(&["country_restricted"]).get();

    Json(json!({
        "requests_checked": state.metrics.requests_checked.get(),
        "blocked": {
            "ip_blacklisted": by_ip,
            "country_restricted": by_country,
            "total": by_ip + by_country
        },
        "whitelist_passes": state.metrics.whitelist_passes.get(),
        "active_sessions": state.sessions.len(),
        "uptime_secs": state.start_time.elapsed().as_secs()
    }))
}
