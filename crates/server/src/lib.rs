pub mod auth;
pub mod middleware;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use state::{AppState, EmbargoMetrics, SharedState};

/// Build the router: site pages, blocked messages, the course access API
/// and, when enabled, the staff management API. Every route sits behind
/// the session and embargo layers.
pub fn build_router(state: SharedState) -> Router {
    let (admin_enabled, admin_cors) = {
        let config = state.config.read().expect("config lock poisoned");
        (config.server.admin.enabled, config.server.admin.cors)
    };

    let mut app = Router::new()
        .route("/", get(routes::pages::index))
        .route("/dashboard", get(routes::pages::dashboard))
        .route("/courses/{*course_path}", get(routes::pages::courseware))
        .route("/enrollment/{*course_id}", post(routes::enrollment::enroll))
        .route(
            "/embargo/blocked-message/{access_point}/{message_key}/",
            get(routes::blocked::blocked_message_page),
        )
        .route(
            "/api/embargo/v1/course_access/",
            get(routes::course_access::course_access),
        )
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/api/health", get(routes::health::health_check))
        .route("/api/metrics", get(routes::metrics::get_metrics));

    if admin_enabled {
        let mut admin = Router::new()
            .route(
                "/api/embargo/ip-filter",
                get(routes::ip_filter::get_ip_filter).put(routes::ip_filter::put_ip_filter),
            )
            .route(
                "/api/embargo/ip-filter/history",
                get(routes::ip_filter::ip_filter_history),
            )
            .route(
                "/api/embargo/restricted-courses",
                get(routes::restricted::list_courses).post(routes::restricted::save_course),
            )
            .route(
                "/api/embargo/restricted-courses/{course_id}",
                delete(routes::restricted::delete_course),
            )
            .route(
                "/api/embargo/restricted-courses/{course_id}/rules",
                post(routes::restricted::set_rule),
            )
            .route(
                "/api/embargo/restricted-courses/{course_id}/rules/{country}",
                delete(routes::restricted::delete_rule),
            )
            .route("/api/embargo/geoip", get(routes::geoip::get_geoip))
            .route("/api/embargo/geoip/reload", post(routes::geoip::reload_geoip))
            .route("/api/embargo/cache/clear", post(routes::restricted::clear_cache))
            .route("/api/embargo/feature", put(routes::restricted::set_feature))
            .route("/api/embargo/stats", get(routes::metrics::get_stats));

        if admin_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            admin = admin.layer(cors);
        }
        app = app.merge(admin);
    }

    // Layers run outermost-last: the session is resolved before the embargo check.
    app.layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::embargo_layer,
    ))
    .layer(axum::middleware::from_fn_with_state(
        state.clone(),
        auth::session_layer,
    ))
    .with_state(state)
}

/// Serve on `listen_addr` until the process is stopped.
pub async fn run_server(state: SharedState, listen_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("embargo server listening on {}", listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Convenience function to create a `SharedState` from an `AppConfig`.
pub fn new_shared_state(config: embargo_common::AppConfig) -> anyhow::Result<SharedState> {
    Ok(Arc::new(AppState::new(config)?))
}
