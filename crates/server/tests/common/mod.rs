#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use embargo_common::{AppConfig, RuleType, UserConfig};
use embargo_geoip::StaticRange;
use embargo_rules::{CourseKey, RestrictedCourse};
use embargo_server::auth::hash_password;
use embargo_server::{build_router, new_shared_state, SharedState};
use http_body_util::BodyExt;
use tower::ServiceExt;

pub const USERNAME: &str = "fred";
pub const PASSWORD: &str = "secret";
pub const STAFF_USERNAME: &str = "staff";
pub const STAFF_PASSWORD: &str = "admin-pass";
pub const COURSE_ID: &str = "course-v1:edX+DemoX+Demo_Course";
/// `COURSE_ID` as it must appear in a query string.
pub const COURSE_ID_QUERY: &str = "course-v1:edX%2BDemoX%2BDemo_Course";
pub const DEFAULT_REMOTE_ADDR: &str = "127.0.0.1";

pub fn course_key() -> CourseKey {
    COURSE_ID.parse().unwrap()
}

pub fn courseware_url() -> String {
    format!("/courses/{COURSE_ID}/")
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.features.embargo = true;
    config.users = vec![
        UserConfig {
            username: USERNAME.to_string(),
            password_sha256: hash_password(PASSWORD),
            is_staff: false,
            country: None,
        },
        UserConfig {
            username: STAFF_USERNAME.to_string(),
            password_sha256: hash_password(STAFF_PASSWORD),
            is_staff: true,
            country: None,
        },
    ];
    config
}

pub struct TestResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub set_cookie: Option<String>,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

async fn read(resp: Response<Body>) -> TestResponse {
    let status = resp.status();
    let header = |name| {
        resp.headers()
            .get(name)
            .map(|v: &axum::http::HeaderValue| v.to_str().unwrap().to_string())
    };
    let location = header(LOCATION);
    let set_cookie = header(SET_COOKIE);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        location,
        set_cookie,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

/// Drives the router in-process, keeping a session cookie between calls.
pub struct TestClient {
    pub state: SharedState,
    app: Router,
    cookie: Option<String>,
}

impl TestClient {
    pub fn new(config: AppConfig) -> Self {
        let state = new_shared_state(config).unwrap();
        let app = build_router(state.clone());
        Self {
            state,
            app,
            cookie: None,
        }
    }

    /// A client for the default test config with the embargo feature on.
    pub fn with_embargo() -> Self {
        Self::new(test_config())
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        ip: Option<&str>,
        json: Option<serde_json::Value>,
    ) -> TestResponse {
        // The socket peer is the last hop, as when behind a proxy. Hops
        // that are not bare addresses leave the default peer in place.
        let peer = ip
            .and_then(|list| list.rsplit(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok())
            .unwrap_or_else(|| DEFAULT_REMOTE_ADDR.parse().unwrap());
        let remote = SocketAddr::new(peer, 40000);

        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .extension(ConnectInfo(remote));
        if let Some(ip) = ip {
            builder = builder.header("x-forwarded-for", ip);
        }
        if let Some(ref cookie) = self.cookie {
            builder = builder.header(COOKIE, cookie);
        }
        let body = match json {
            Some(value) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let resp = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        read(resp).await
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Method::GET, path, None, None).await
    }

    pub async fn get_from(&self, path: &str, ip: &str) -> TestResponse {
        self.request(Method::GET, path, Some(ip), None).await
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> TestResponse {
        self.request(Method::POST, path, None, Some(body)).await
    }

    pub async fn put_json(&self, path: &str, body: serde_json::Value) -> TestResponse {
        self.request(Method::PUT, path, None, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request(Method::DELETE, path, None, None).await
    }

    pub async fn login(&mut self, username: &str, password: &str) {
        let resp = self
            .post_json(
                "/login",
                serde_json::json!({ "username": username, "password": password }),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK, "login failed: {}", resp.body);
        let cookie = resp.set_cookie.expect("login sets a cookie");
        self.cookie = Some(cookie.split(';').next().unwrap().to_string());
    }

    pub fn logout(&mut self) {
        self.cookie = None;
    }

    /// Assert a 302 to `expected` and that the target page itself loads,
    /// requested from the same address.
    pub async fn assert_redirects(&self, resp: &TestResponse, expected: &str, ip: Option<&str>) {
        assert_eq!(resp.status, StatusCode::FOUND, "body: {}", resp.body);
        assert_eq!(resp.location.as_deref(), Some(expected));
        let target = self.request(Method::GET, expected, ip, None).await;
        assert_eq!(target.status, StatusCode::OK);
    }

    pub fn set_ip_filter(&self, blacklist: &str, whitelist: &str, enabled: bool) {
        self.state
            .policy
            .ip_filters()
            .create(embargo_ip_filter::IpFilterUpdate {
                whitelist: whitelist.to_string(),
                blacklist: blacklist.to_string(),
                enabled,
                changed_by: None,
            })
            .unwrap();
    }

    /// Restrict the test course so that every IPv4 client is blocked by
    /// country, and return the courseware blocked-message URL.
    pub fn restrict_course(&self, disable_access_check: bool) -> String {
        let restrictions = self.state.policy.restrictions();
        let mut course = RestrictedCourse::new(course_key());
        course.disable_access_check = disable_access_check;
        restrictions.upsert_course(course).unwrap();
        restrictions
            .set_rule(&course_key(), "IR".parse().unwrap(), RuleType::Blacklist)
            .unwrap();

        self.state
            .policy
            .geoip()
            .set_static_ranges(vec![StaticRange::new("0.0.0.0/0".parse().unwrap(), "IR")]);

        restrictions.message_url_path(&course_key(), embargo_rules::AccessPoint::Courseware)
    }
}
