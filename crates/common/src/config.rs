use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Top-level embargo service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub embargo: EmbargoConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin: AdminConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Mount the staff-only `/api/embargo/*` management routes.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Allow cross-origin calls to the management API.
    #[serde(default)]
    pub cors: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cors: false,
        }
    }
}

/// Site-wide feature switches.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeatureFlags {
    /// Master switch for the embargo middleware and course access checks.
    #[serde(default)]
    pub embargo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbargoConfig {
    /// Take the client address from the first `X-Forwarded-For` hop when present.
    #[serde(default = "default_true")]
    pub trust_forwarded_for: bool,
    /// Extra path prefixes that are never embargoed.
    #[serde(default)]
    pub exempt_paths: Vec<String>,
    /// Initial IP filter record.
    #[serde(default)]
    pub ip_filter: Option<IpFilterConfig>,
    #[serde(default)]
    pub restricted_courses: Vec<RestrictedCourseConfig>,
}

impl Default for EmbargoConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_for: true,
            exempt_paths: vec![],
            ip_filter: None,
            restricted_courses: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IpFilterConfig {
    /// Comma separated addresses or CIDR networks.
    #[serde(default)]
    pub whitelist: String,
    /// Comma separated addresses or CIDR networks.
    #[serde(default)]
    pub blacklist: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictedCourseConfig {
    pub course_id: String,
    #[serde(default = "default_message_key")]
    pub enroll_msg_key: String,
    #[serde(default = "default_message_key")]
    pub access_msg_key: String,
    #[serde(default)]
    pub disable_access_check: bool,
    #[serde(default)]
    pub rules: Vec<CountryRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryRuleConfig {
    pub country: String,
    pub rule_type: RuleType,
}

/// Whether a country rule grants or denies access to a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Whitelist,
    Blacklist,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeoIpConfig {
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Fixed network to country mappings consulted before the database.
    #[serde(default)]
    pub static_ranges: Vec<StaticRangeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRangeConfig {
    pub network: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    /// Hex-encoded SHA-256 digest of the password.
    pub password_sha256: String,
    #[serde(default)]
    pub is_staff: bool,
    /// Country from the user's profile, if any.
    #[serde(default)]
    pub country: Option<String>,
}

// Default value helpers
fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_true() -> bool {
    true
}
fn default_message_key() -> String {
    "default".to_string()
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        tracing::debug!(
            path,
            restricted_courses = config.embargo.restricted_courses.len(),
            users = config.users.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Validate the configuration for consistency.
    ///
    /// Only shape is checked here; IP lists and course keys are parsed
    /// strictly when the records are created.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.listen.trim().is_empty() {
            anyhow::bail!("server.listen must not be empty");
        }

        let mut seen_courses = HashSet::new();
        for course in &self.embargo.restricted_courses {
            if course.course_id.trim().is_empty() {
                anyhow::bail!("restricted course with empty course_id");
            }
            if !seen_courses.insert(course.course_id.as_str()) {
                anyhow::bail!("restricted course '{}' listed twice", course.course_id);
            }
            let mut seen_countries = HashSet::new();
            for rule in &course.rules {
                if !is_country_code(&rule.country) {
                    anyhow::bail!(
                        "course '{}' has invalid country code '{}'",
                        course.course_id,
                        rule.country
                    );
                }
                if !seen_countries.insert(rule.country.to_ascii_uppercase()) {
                    anyhow::bail!(
                        "course '{}' has more than one rule for country '{}'",
                        course.course_id,
                        rule.country
                    );
                }
            }
        }

        for range in &self.geoip.static_ranges {
            if range.network.parse::<ipnet::IpNet>().is_err()
                && range.network.parse::<std::net::IpAddr>().is_err()
            {
                anyhow::bail!("geoip static range '{}' is not a network", range.network);
            }
            if !is_country_code(&range.country) {
                anyhow::bail!(
                    "geoip static range '{}' has invalid country code '{}'",
                    range.network,
                    range.country
                );
            }
        }

        let mut seen_users = HashSet::new();
        for user in &self.users {
            if !seen_users.insert(user.username.as_str()) {
                anyhow::bail!("user '{}' listed twice", user.username);
            }
            if user.password_sha256.len() != 64
                || !user.password_sha256.chars().all(|c| c.is_ascii_hexdigit())
            {
                anyhow::bail!("user '{}' has a malformed password digest", user.username);
            }
        }

        Ok(())
    }
}

fn is_country_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("features:\n  embargo: true\n").unwrap();
        assert!(config.features.embargo);
        assert_eq!(config.server.listen, "127.0.0.1:8000");
        assert!(config.embargo.trust_forwarded_for);
        assert!(config.embargo.ip_filter.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_restricted_course_defaults() {
        let yaml = r#"
embargo:
  restricted_courses:
    - course_id: "course-v1:edX+Demo+2024"
      rules:
        - country: ir
          rule_type: blacklist
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let course = &config.embargo.restricted_courses[0];
        assert_eq!(course.enroll_msg_key, "default");
        assert_eq!(course.access_msg_key, "default");
        assert!(!course.disable_access_check);
        assert_eq!(course.rules[0].rule_type, RuleType::Blacklist);
        config.validate().unwrap();
    }

    #[test]
    fn test_duplicate_country_rule_rejected() {
        let yaml = r#"
embargo:
  restricted_courses:
    - course_id: "course-v1:edX+Demo+2024"
      rules:
        - { country: IR, rule_type: blacklist }
        - { country: ir, rule_type: whitelist }
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_static_range_rejected() {
        let yaml = r#"
geoip:
  static_ranges:
    - { network: "not-a-net", country: US }
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_password_digest_rejected() {
        let yaml = r#"
users:
  - { username: fred, password_sha256: "abc" }
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
