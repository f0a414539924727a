use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use embargo_common::AppConfig;
use embargo_geoip::GeoIpResolver;
use embargo_ip_filter::{IpFilterStore, IpFilterUpdate, IpVerdict};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::course_key::CourseKey;
use crate::messages::{blocked_message_path, AccessPoint, BLOCKED_MESSAGE_PREFIX};
use crate::restrictions::RestrictionStore;

/// Prefix of the course access API, which is never embargoed itself.
pub const COURSE_ACCESS_API_PREFIX: &str = "/api/embargo/v1/course_access/";

/// The requesting user, as far as the embargo checks care.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub username: String,
    pub is_staff: bool,
    /// Country from the user's profile; may be empty or missing.
    pub profile_country: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    FeatureDisabled,
    ExemptPath,
    Whitelisted,
    NotCourseware,
    CourseAccessGranted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    IpBlacklisted,
    CountryRestricted,
}

impl BlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockReason::IpBlacklisted => "ip_blacklisted",
            BlockReason::CountryRestricted => "country_restricted",
        }
    }
}

/// What the middleware should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(AllowReason),
    Redirect { location: String, reason: BlockReason },
}

/// Embargo rules engine: feature switch, IP filter, country rules and GeoIP.
pub struct EmbargoPolicy {
    enabled: AtomicBool,
    exempt_paths: Vec<String>,
    ip_filters: IpFilterStore,
    restrictions: RestrictionStore,
    geoip: GeoIpResolver,
}

impl EmbargoPolicy {
    pub fn new(
        enabled: bool,
        extra_exempt_paths: Vec<String>,
        ip_filters: IpFilterStore,
        restrictions: RestrictionStore,
        geoip: GeoIpResolver,
    ) -> Self {
        let mut exempt_paths = vec![
            BLOCKED_MESSAGE_PREFIX.to_string(),
            COURSE_ACCESS_API_PREFIX.to_string(),
        ];
        exempt_paths.extend(extra_exempt_paths);

        Self {
            enabled: AtomicBool::new(enabled),
            exempt_paths,
            ip_filters,
            restrictions,
            geoip,
        }
    }

    /// Build the engine from configuration, seeding the IP filter and the
    /// restricted courses.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let ip_filters = IpFilterStore::new();
        if let Some(ref seed) = config.embargo.ip_filter {
            ip_filters.create(IpFilterUpdate::from(seed))?;
        }
        let restrictions = RestrictionStore::from_config(&config.embargo.restricted_courses)?;
        let geoip = GeoIpResolver::new(&config.geoip)?;

        info!(
            enabled = config.features.embargo,
            restricted_courses = config.embargo.restricted_courses.len(),
            "embargo policy initialised"
        );

        Ok(Self::new(
            config.features.embargo,
            config.embargo.exempt_paths.clone(),
            ip_filters,
            restrictions,
            geoip,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "embargo feature switched");
    }

    pub fn ip_filters(&self) -> &IpFilterStore {
        &self.ip_filters
    }

    pub fn restrictions(&self) -> &RestrictionStore {
        &self.restrictions
    }

    pub fn geoip(&self) -> &GeoIpResolver {
        &self.geoip
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Whether the user at `ip` may access `course`.
    ///
    /// Staff always pass. Otherwise both the country of the IP and the
    /// country in the user's profile must be admitted by the course rules.
    pub fn check_course_access(
        &self,
        course: &CourseKey,
        user: Option<&UserContext>,
        ip: Option<IpAddr>,
    ) -> bool {
        if !self.is_enabled() || !self.restrictions.is_restricted(course) {
            return true;
        }

        if user.is_some_and(|u| u.is_staff) {
            return true;
        }

        if let Some(addr) = ip {
            let country = self.geoip.lookup_country(addr);
            if !self.restrictions.check_country_access(course, country.as_deref()) {
                info!(
                    course = %course,
                    ip = %addr,
                    country = country.as_deref().unwrap_or(""),
                    "blocked by country of IP address"
                );
                return false;
            }
        }

        if let Some(user) = user {
            let country = user.profile_country.as_deref();
            if !self.restrictions.check_country_access(course, country) {
                info!(
                    course = %course,
                    user = %user.username,
                    country = country.unwrap_or(""),
                    "blocked by profile country"
                );
                return false;
            }
        }

        true
    }

    /// Blocked-message URL if access is denied, `None` otherwise.
    ///
    /// At the courseware access point a course with its access check
    /// disabled is never blocked.
    pub fn redirect_if_blocked(
        &self,
        course: &CourseKey,
        access_point: AccessPoint,
        user: Option<&UserContext>,
        ip: Option<IpAddr>,
    ) -> Option<String> {
        if !self.is_enabled() || self.check_course_access(course, user, ip) {
            return None;
        }
        if access_point == AccessPoint::Courseware
            && self.restrictions.is_disabled_access_check(course)
        {
            debug!(course = %course, "courseware access check disabled");
            return None;
        }
        Some(self.restrictions.message_url_path(course, access_point))
    }

    /// Decide what to do with a request for `path` from `ip`.
    pub fn evaluate_request(
        &self,
        path: &str,
        ip: Option<IpAddr>,
        user: Option<&UserContext>,
    ) -> Decision {
        if !self.is_enabled() {
            return Decision::Allow(AllowReason::FeatureDisabled);
        }
        if self.is_exempt(path) {
            return Decision::Allow(AllowReason::ExemptPath);
        }

        if let Some(addr) = ip {
            match self.ip_filters.check(addr) {
                IpVerdict::Blacklisted => {
                    info!(
                        ip = %addr,
                        path,
                        user = user.map(|u| u.username.as_str()).unwrap_or(""),
                        "blocked blacklisted IP address"
                    );
                    return Decision::Redirect {
                        location: blocked_message_path(AccessPoint::Courseware, "embargo"),
                        reason: BlockReason::IpBlacklisted,
                    };
                }
                IpVerdict::Whitelisted => {
                    info!(ip = %addr, path, "whitelisted IP address skips country checks");
                    return Decision::Allow(AllowReason::Whitelisted);
                }
                IpVerdict::Unlisted => {}
            }
        }

        let Some(course) = CourseKey::from_path(path) else {
            return Decision::Allow(AllowReason::NotCourseware);
        };

        match self.redirect_if_blocked(&course, AccessPoint::Courseware, user, ip) {
            Some(location) => Decision::Redirect {
                location,
                reason: BlockReason::CountryRestricted,
            },
            None => Decision::Allow(AllowReason::CourseAccessGranted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course_key::Country;
    use crate::restrictions::RestrictedCourse;
    use embargo_common::RuleType;
    use embargo_geoip::StaticRange;

    const COURSE_PATH: &str = "/courses/course-v1:edX+DemoX+2024/courseware/";

    fn course() -> CourseKey {
        "course-v1:edX+DemoX+2024".parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn policy() -> EmbargoPolicy {
        EmbargoPolicy::new(
            true,
            vec![],
            IpFilterStore::new(),
            RestrictionStore::new(),
            GeoIpResolver::new_empty(),
        )
    }

    /// Restrict the test course to everyone outside Iran and place every
    /// IPv4 address in Iran.
    fn restrict(policy: &EmbargoPolicy, disable_access_check: bool) {
        let mut restricted = RestrictedCourse::new(course());
        restricted.disable_access_check = disable_access_check;
        policy.restrictions().upsert_course(restricted).unwrap();
        policy
            .restrictions()
            .set_rule(&course(), "IR".parse::<Country>().unwrap(), RuleType::Blacklist)
            .unwrap();
        policy
            .geoip()
            .set_static_ranges(vec![StaticRange::new("0.0.0.0/0".parse().unwrap(), "IR")]);
    }

    fn blacklist(policy: &EmbargoPolicy, list: &str, whitelist: &str, enabled: bool) {
        policy
            .ip_filters()
            .create(IpFilterUpdate {
                whitelist: whitelist.to_string(),
                blacklist: list.to_string(),
                enabled,
                changed_by: None,
            })
            .unwrap();
    }

    fn user(country: Option<&str>, is_staff: bool) -> UserContext {
        UserContext {
            username: "fred".to_string(),
            is_staff,
            profile_country: country.map(String::from),
        }
    }

    #[test]
    fn test_feature_disabled_allows_everything() {
        let policy = policy();
        restrict(&policy, false);
        blacklist(&policy, "1.0.0.0", "", true);
        policy.set_enabled(false);

        assert_eq!(
            policy.evaluate_request(COURSE_PATH, Some(ip("1.0.0.0")), None),
            Decision::Allow(AllowReason::FeatureDisabled)
        );
        assert!(policy.check_course_access(&course(), None, Some(ip("1.0.0.0"))));
        assert_eq!(policy.redirect_if_blocked(&course(), AccessPoint::Enrollment, None, None), None);
    }

    #[test]
    fn test_restricted_course_redirects_courseware() {
        let policy = policy();
        restrict(&policy, false);

        assert_eq!(
            policy.evaluate_request(COURSE_PATH, Some(ip("127.0.0.1")), None),
            Decision::Redirect {
                location: "/embargo/blocked-message/courseware/default/".to_string(),
                reason: BlockReason::CountryRestricted,
            }
        );
        assert_eq!(
            policy.evaluate_request("/dashboard", Some(ip("127.0.0.1")), None),
            Decision::Allow(AllowReason::NotCourseware)
        );
    }

    #[test]
    fn test_disable_access_check_only_affects_courseware() {
        let policy = policy();
        restrict(&policy, true);

        assert_eq!(
            policy.evaluate_request(COURSE_PATH, Some(ip("127.0.0.1")), None),
            Decision::Allow(AllowReason::CourseAccessGranted)
        );
        assert_eq!(
            policy
                .redirect_if_blocked(&course(), AccessPoint::Enrollment, None, Some(ip("127.0.0.1")))
                .as_deref(),
            Some("/embargo/blocked-message/enrollment/default/")
        );
    }

    #[test]
    fn test_restricted_course_without_rules_is_open() {
        let policy = policy();
        policy
            .restrictions()
            .upsert_course(RestrictedCourse::new(course()))
            .unwrap();
        assert!(policy.check_course_access(&course(), None, Some(ip("5.5.5.5"))));
    }

    #[test]
    fn test_ip_access_rules() {
        let cases: &[(&str, &str, &str, bool, bool)] = &[
            // request ip, blacklist, whitelist, enabled, allowed
            ("173.194.123.35", "173.194.123.35", "", true, false),
            ("173.194.123.35", "173.194.0.0/16", "", true, false),
            ("173.194.123.35", "127.0.0.0/32, 173.194.0.0/16", "", true, false),
            ("173.195.10.20", "173.194.0.0/16", "", true, true),
            ("173.194.123.35", "173.194.0.0/16", "173.194.0.0/16", true, false),
            ("173.194.123.35", "", "173.194.0.0/16", true, true),
            ("192.178.2.3", "", "173.194.0.0/16", true, true),
            ("173.194.123.35", "173.194.123.35", "", false, true),
        ];

        for &(request_ip, black, white, enabled, allowed) in cases {
            let policy = policy();
            blacklist(&policy, black, white, enabled);
            let decision = policy.evaluate_request("/", Some(ip(request_ip)), None);
            if allowed {
                assert!(matches!(decision, Decision::Allow(_)), "{request_ip}: {decision:?}");
            } else {
                assert_eq!(
                    decision,
                    Decision::Redirect {
                        location: "/embargo/blocked-message/courseware/embargo/".to_string(),
                        reason: BlockReason::IpBlacklisted,
                    },
                    "{request_ip}"
                );
            }
        }
    }

    #[test]
    fn test_blocked_message_is_exempt() {
        let policy = policy();
        blacklist(&policy, "192.168.10.20", "", true);
        for point in ["courseware", "enrollment"] {
            for key in ["default", "embargo"] {
                let path = format!("/embargo/blocked-message/{point}/{key}/");
                assert_eq!(
                    policy.evaluate_request(&path, Some(ip("192.168.10.20")), None),
                    Decision::Allow(AllowReason::ExemptPath)
                );
            }
        }
    }

    #[test]
    fn test_whitelist_skips_country_checks() {
        let policy = policy();
        restrict(&policy, false);
        blacklist(&policy, "", "192.168.10.20", true);
        assert_eq!(
            policy.evaluate_request(COURSE_PATH, Some(ip("192.168.10.20")), None),
            Decision::Allow(AllowReason::Whitelisted)
        );
    }

    #[test]
    fn test_profile_country() {
        let policy = policy();
        let mut restricted = RestrictedCourse::new(course());
        restricted.access_msg_key = "embargo".to_string();
        policy.restrictions().upsert_course(restricted).unwrap();
        for code in ["CU", "IR", "SY", "SD"] {
            policy
                .restrictions()
                .set_rule(&course(), code.parse().unwrap(), RuleType::Blacklist)
                .unwrap();
        }

        let cases = [
            (None, true),
            (Some(""), true),
            (Some("us"), true),
            (Some("CU"), false),
            (Some("Ir"), false),
            (Some("sy"), false),
            (Some("sd"), false),
        ];
        for (country, allowed) in cases {
            let u = user(country, false);
            assert_eq!(
                policy.check_course_access(&course(), Some(&u), None),
                allowed,
                "{country:?}"
            );
        }

        let blocked = user(Some("CU"), false);
        assert_eq!(
            policy.evaluate_request(COURSE_PATH, None, Some(&blocked)),
            Decision::Redirect {
                location: "/embargo/blocked-message/courseware/embargo/".to_string(),
                reason: BlockReason::CountryRestricted,
            }
        );
    }

    #[test]
    fn test_staff_bypass() {
        let policy = policy();
        restrict(&policy, false);
        let staff = user(Some("IR"), true);
        assert!(policy.check_course_access(&course(), Some(&staff), Some(ip("5.0.0.1"))));
    }

    #[test]
    fn test_extra_exempt_paths() {
        let policy = EmbargoPolicy::new(
            true,
            vec!["/static/".to_string()],
            IpFilterStore::new(),
            RestrictionStore::new(),
            GeoIpResolver::new_empty(),
        );
        blacklist(&policy, "10.0.0.0/8", "", true);
        assert_eq!(
            policy.evaluate_request("/static/app.css", Some(ip("10.0.0.1")), None),
            Decision::Allow(AllowReason::ExemptPath)
        );
        assert!(matches!(
            policy.evaluate_request("/", Some(ip("10.0.0.1")), None),
            Decision::Redirect { .. }
        ));
    }

    #[test]
    fn test_from_config() {
        let yaml = r#"
features:
  embargo: true
embargo:
  ip_filter:
    blacklist: "5.0.0.0/8"
    enabled: true
  restricted_courses:
    - course_id: "course-v1:edX+DemoX+2024"
      rules:
        - { country: IR, rule_type: blacklist }
geoip:
  static_ranges:
    - { network: "2.0.0.0/8", country: IR }
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let policy = EmbargoPolicy::from_config(&config).unwrap();

        assert!(policy.is_enabled());
        assert!(matches!(
            policy.evaluate_request("/", Some(ip("5.1.1.1")), None),
            Decision::Redirect { reason: BlockReason::IpBlacklisted, .. }
        ));
        assert!(matches!(
            policy.evaluate_request(COURSE_PATH, Some(ip("2.1.1.1")), None),
            Decision::Redirect { reason: BlockReason::CountryRestricted, .. }
        ));
        assert_eq!(
            policy.evaluate_request(COURSE_PATH, Some(ip("3.1.1.1")), None),
            Decision::Allow(AllowReason::CourseAccessGranted)
        );
    }
}
