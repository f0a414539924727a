use std::sync::{Arc, RwLock};

use embargo_common::AppConfig;
use embargo_rules::EmbargoPolicy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::auth::{SessionStore, UserDirectory};

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AppState>;

/// Central application state: configuration, the embargo engine, users and
/// sessions, and metrics.
pub struct AppState {
    pub config: RwLock<AppConfig>,
    pub policy: EmbargoPolicy,
    pub users: UserDirectory,
    pub sessions: SessionStore,
    pub metrics: EmbargoMetrics,
    pub trust_forwarded_for: bool,
    pub start_time: std::time::Instant,
}

/// Prometheus metrics collected by the embargo middleware.
pub struct EmbargoMetrics {
    pub registry: Registry,
    pub requests_checked: IntCounter,
    pub requests_blocked: IntCounterVec,
    pub whitelist_passes: IntCounter,
}

impl EmbargoMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_checked = IntCounter::with_opts(Opts::new(
            "embargo_requests_checked_total",
            "Total number of requests seen by the embargo middleware",
        ))
        .expect("failed to create requests_checked counter");

        let requests_blocked = IntCounterVec::new(
            Opts::new(
                "embargo_requests_blocked_total",
                "Requests redirected to a blocked message, by reason",
            ),
            &["reason"],
        )
        .expect("failed to create requests_blocked counter");

        let whitelist_passes = IntCounter::with_opts(Opts::new(
            "embargo_whitelist_passes_total",
            "Requests that skipped country checks because of the IP whitelist",
        ))
        .expect("failed to create whitelist_passes counter");

        registry
            .register(Box::new(requests_checked.clone()))
            .expect("failed to register requests_checked");
        registry
            .register(Box::new(requests_blocked.clone()))
            .expect("failed to register requests_blocked");
        registry
            .register(Box::new(whitelist_passes.clone()))
            .expect("failed to register whitelist_passes");

        Self {
            registry,
            requests_checked,
            requests_blocked,
            whitelist_passes,
        }
    }
}

impl Default for EmbargoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Build the state from configuration. Fails if a seeded record or the
    /// GeoIP database is invalid.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let policy = EmbargoPolicy::from_config(&config)?;
        let users = UserDirectory::from_config(&config.users);
        let trust_forwarded_for = config.embargo.trust_forwarded_for;

        Ok(Self {
            config: RwLock::new(config),
            policy,
            users,
            sessions: SessionStore::new(),
            metrics: EmbargoMetrics::new(),
            trust_forwarded_for,
            start_time: std::time::Instant::now(),
        })
    }
}
