use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use embargo_rules::{AllowReason, Decision, UserContext};
use http::header::LOCATION;
use http::{HeaderMap, StatusCode};
use tracing::debug;

use crate::state::SharedState;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Client address resolved by [`embargo_layer`], for downstream handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

/// Determine the client address.
///
/// The first `X-Forwarded-For` hop wins when forwarded headers are trusted
/// and it parses; otherwise the socket peer address is used. IPv4-mapped
/// IPv6 addresses are reduced to plain IPv4.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| parse_hop(first.trim()));
        if let Some(addr) = forwarded {
            return Some(addr.to_canonical());
        }
    }
    peer.map(|addr| addr.ip().to_canonical())
}

/// Parse one forwarded hop, which some load balancers send with a port.
fn parse_hop(hop: &str) -> Option<IpAddr> {
    hop.parse::<IpAddr>()
        .ok()
        .or_else(|| hop.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// A 302 redirect, the status browsers and the blocked-message flow expect.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

/// Enforce the embargo on every request.
///
/// Runs after the session layer so the logged-in user is visible.
pub async fn embargo_layer(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(req.headers(), peer, state.trust_forwarded_for);
    let user = req.extensions().get::<UserContext>().cloned();

    state.metrics.requests_checked.inc();
    let decision = state
        .policy
        .evaluate_request(req.uri().path(), ip, user.as_ref());

    match decision {
        Decision::Allow(reason) => {
            if reason == AllowReason::Whitelisted {
                state.metrics.whitelist_passes.inc();
            }
            debug!(path = %req.uri().path(), ?reason, "embargo check passed");
            req.extensions_mut().insert(ClientIp(ip));
            next.run(req).await
        }
        Decision::Redirect { location, reason } => {
            state
                .metrics
                .requests_blocked
                .with_label_values(&[reason.as_str()])
                .inc();
            found(&location)
        }
    }
}
