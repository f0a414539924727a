use std::net::IpAddr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use embargo_common::EmbargoError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::StaffUser;
use crate::routes::error_response;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct GeoIpQuery {
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Serialize)]
pub struct StaticRangeView {
    pub network: String,
    pub country: String,
}

#[derive(Serialize)]
pub struct GeoIpResponse {
    pub database_loaded: bool,
    pub static_ranges: Vec<StaticRangeView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// GET /api/embargo/geoip?ip=..
///
/// Shows the configured sources and, with `ip`, the country it resolves to.
pub async fn get_geoip(
    _staff: StaffUser,
    State(state): State<SharedState>,
    Query(query): Query<GeoIpQuery>,
) -> Result<Json<GeoIpResponse>, (StatusCode, Json<Value>)> {
    let geoip = state.policy.geoip();

    let (ip, country) = match query.ip.as_deref().filter(|ip| !ip.is_empty()) {
        Some(raw) => {
            let addr: IpAddr = raw
                .parse()
                .map_err(|_| error_response(&EmbargoError::InvalidIpEntry(raw.to_string())))?;
            (Some(addr.to_string()), geoip.lookup_country(addr))
        }
        None => (None, None),
    };

    let static_ranges = geoip
        .static_ranges()
        .into_iter()
        .map(|range| StaticRangeView {
            network: range.network.to_string(),
            country: range.country,
        })
        .collect();

    Ok(Json(GeoIpResponse {
        database_loaded: geoip.has_database(),
        static_ranges,
        ip,
        country,
    }))
}

/// POST /api/embargo/geoip/reload
///
/// Re-opens the database at the configured `geoip.database_path`.
pub async fn reload_geoip(
    StaffUser(staff): StaffUser,
    State(state): State<SharedState>,
) -> (StatusCode, Json<Value>) {
    let path = {
        let config = state.config.read().expect("config lock poisoned");
        config.geoip.database_path.clone()
    };
    let Some(path) = path else {
        return error_response(&EmbargoError::Config(
            "geoip.database_path is not set".to_string(),
        ));
    };

    match state.policy.geoip().reload(&path) {
        Ok(()) => {
            info!(by = %staff.username, path = %path.display(), "GeoIP database reloaded via admin API");
            (
                StatusCode::OK,
                Json(json!({ "status": "reloaded", "path": path.display().to_string() })),
            )
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "GeoIP reload failed");
            error_response(&EmbargoError::Other(e))
        }
    }
}
