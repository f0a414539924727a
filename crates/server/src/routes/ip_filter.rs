use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use embargo_ip_filter::{ActiveIpFilter, IpFilterUpdate};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::StaffUser;
use crate::routes::error_response;
use crate::state::SharedState;

fn describe(active: &ActiveIpFilter) -> Value {
    let networks = |list: &embargo_ip_filter::IpNetworkList| {
        list.networks().iter().map(|n| n.to_string()).collect::<Vec<_>>()
    };
    json!({
        "record": active.record(),
        "enabled": active.enabled(),
        "whitelist_networks": networks(active.whitelist_ips()),
        "blacklist_networks": networks(active.blacklist_ips())
    })
}

/// GET /api/embargo/ip-filter
///
/// The active IP filter and its parsed networks.
pub async fn get_ip_filter(_staff: StaffUser, State(state): State<SharedState>) -> Json<Value> {
    Json(describe(&state.policy.ip_filters().current()))
}

/// Request body for saving a new IP filter.
#[derive(Debug, Deserialize)]
pub struct SaveIpFilterRequest {
    #[serde(default)]
    pub whitelist: String,
    #[serde(default)]
    pub blacklist: String,
    #[serde(default)]
    pub enabled: bool,
}

/// PUT /api/embargo/ip-filter
///
/// Saves a new filter record, which becomes active immediately. Every list
/// entry must parse or the whole request is rejected.
pub async fn put_ip_filter(
    StaffUser(staff): StaffUser,
    State(state): State<SharedState>,
    Json(body): Json<SaveIpFilterRequest>,
) -> (StatusCode, Json<Value>) {
    let update = IpFilterUpdate {
        whitelist: body.whitelist,
        blacklist: body.blacklist,
        enabled: body.enabled,
        changed_by: Some(staff.username.clone()),
    };

    match state.policy.ip_filters().create(update) {
        Ok(record) => {
            tracing::info!(id = record.id, changed_by = %staff.username, "IP filter updated via admin API");
            (
                StatusCode::CREATED,
                Json(json!({ "status": "created", "record": record })),
            )
        }
        Err(e) => error_response(&e),
    }
}

/// GET /api/embargo/ip-filter/history
pub async fn ip_filter_history(_staff: StaffUser, State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "records": state.policy.ip_filters().history() }))
}
