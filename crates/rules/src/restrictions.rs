use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use embargo_common::{EmbargoError, EmbargoResult, RestrictedCourseConfig, RuleType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::course_key::{CourseKey, Country};
use crate::messages::{self, AccessPoint};

/// A course subject to country access rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictedCourse {
    pub course_key: CourseKey,
    #[serde(default = "default_message_key")]
    pub enroll_msg_key: String,
    #[serde(default = "default_message_key")]
    pub access_msg_key: String,
    /// Skip the courseware check for this course; enrollment is still checked.
    #[serde(default)]
    pub disable_access_check: bool,
}

fn default_message_key() -> String {
    "default".to_string()
}

impl RestrictedCourse {
    pub fn new(course_key: CourseKey) -> Self {
        Self {
            course_key,
            enroll_msg_key: default_message_key(),
            access_msg_key: default_message_key(),
            disable_access_check: false,
        }
    }

    fn message_key(&self, access_point: AccessPoint) -> &str {
        match access_point {
            AccessPoint::Enrollment => &self.enroll_msg_key,
            AccessPoint::Courseware => &self.access_msg_key,
        }
    }
}

/// Grants or denies one country access to one restricted course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryAccessRule {
    pub course_key: CourseKey,
    pub country: Country,
    pub rule_type: RuleType,
}

/// A restricted course together with its rules, as reported by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct RestrictedCourseView {
    #[serde(flatten)]
    pub course: RestrictedCourse,
    pub rules: Vec<CountryAccessRule>,
}

/// The countries a course admits, derived from its rules.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CountryAccess {
    whitelist: BTreeSet<Country>,
    blacklist: BTreeSet<Country>,
}

impl CountryAccess {
    fn from_rules(rules: &BTreeMap<Country, RuleType>) -> Self {
        let mut access = Self::default();
        for (country, rule_type) in rules {
            match rule_type {
                RuleType::Whitelist => access.whitelist.insert(country.clone()),
                RuleType::Blacklist => access.blacklist.insert(country.clone()),
            };
        }
        access
    }

    /// With no whitelist rules every country is admitted; blacklisted
    /// countries are then removed. `None` (unknown country) is always admitted.
    pub fn allows(&self, country: Option<&Country>) -> bool {
        let Some(country) = country else {
            return true;
        };
        if self.blacklist.contains(country) {
            return false;
        }
        self.whitelist.is_empty() || self.whitelist.contains(country)
    }
}

struct CourseEntry {
    course: RestrictedCourse,
    rules: BTreeMap<Country, RuleType>,
}

/// In-memory table of restricted courses and their country rules.
///
/// Derived answers are cached per course and dropped whenever the table
/// changes.
pub struct RestrictionStore {
    courses: RwLock<HashMap<CourseKey, CourseEntry>>,
    access_cache: DashMap<CourseKey, Arc<CountryAccess>>,
    message_cache: DashMap<(CourseKey, AccessPoint), String>,
}

impl RestrictionStore {
    pub fn new() -> Self {
        Self {
            courses: RwLock::new(HashMap::new()),
            access_cache: DashMap::new(),
            message_cache: DashMap::new(),
        }
    }

    /// Build a store from configured courses, failing on the first bad entry.
    pub fn from_config(configs: &[RestrictedCourseConfig]) -> EmbargoResult<Self> {
        let store = Self::new();
        for config in configs {
            let course_key: CourseKey = config.course_id.parse()?;
            store.upsert_course(RestrictedCourse {
                course_key: course_key.clone(),
                enroll_msg_key: config.enroll_msg_key.clone(),
                access_msg_key: config.access_msg_key.clone(),
                disable_access_check: config.disable_access_check,
            })?;
            for rule in &config.rules {
                store.set_rule(&course_key, rule.country.parse()?, rule.rule_type)?;
            }
        }
        Ok(store)
    }

    /// Create or replace a restricted course. Existing rules are kept.
    pub fn upsert_course(&self, course: RestrictedCourse) -> EmbargoResult<()> {
        for point in [AccessPoint::Enrollment, AccessPoint::Courseware] {
            messages::blocked_message(point, course.message_key(point))?;
        }

        let key = course.course_key.clone();
        {
            let mut courses = self.courses.write().expect("restrictions lock poisoned");
            match courses.get_mut(&key) {
                Some(entry) => entry.course = course,
                None => {
                    courses.insert(
                        key.clone(),
                        CourseEntry {
                            course,
                            rules: BTreeMap::new(),
                        },
                    );
                }
            }
        }
        self.invalidate(&key);
        info!(course = %key, "saved restricted course");
        Ok(())
    }

    /// Remove a restricted course and all of its rules.
    pub fn remove_course(&self, key: &CourseKey) -> EmbargoResult<RestrictedCourse> {
        let removed = self
            .courses
            .write()
            .expect("restrictions lock poisoned")
            .remove(key)
            .ok_or_else(|| EmbargoError::NotFound(format!("restricted course {key}")))?;
        self.invalidate(key);
        info!(course = %key, "removed restricted course");
        Ok(removed.course)
    }

    /// Add or change the rule for one country on a restricted course.
    pub fn set_rule(
        &self,
        key: &CourseKey,
        country: Country,
        rule_type: RuleType,
    ) -> EmbargoResult<CountryAccessRule> {
        {
            let mut courses = self.courses.write().expect("restrictions lock poisoned");
            let entry = courses
                .get_mut(key)
                .ok_or_else(|| EmbargoError::NotFound(format!("restricted course {key}")))?;
            entry.rules.insert(country.clone(), rule_type);
        }
        self.invalidate(key);
        info!(course = %key, country = %country, ?rule_type, "saved country access rule");
        Ok(CountryAccessRule {
            course_key: key.clone(),
            country,
            rule_type,
        })
    }

    pub fn remove_rule(&self, key: &CourseKey, country: &Country) -> EmbargoResult<()> {
        {
            let mut courses = self.courses.write().expect("restrictions lock poisoned");
            let entry = courses
                .get_mut(key)
                .ok_or_else(|| EmbargoError::NotFound(format!("restricted course {key}")))?;
            entry.rules.remove(country).ok_or_else(|| {
                EmbargoError::NotFound(format!("rule for {country} on course {key}"))
            })?;
        }
        self.invalidate(key);
        info!(course = %key, country = %country, "removed country access rule");
        Ok(())
    }

    pub fn get_course(&self, key: &CourseKey) -> Option<RestrictedCourse> {
        self.courses
            .read()
            .expect("restrictions lock poisoned")
            .get(key)
            .map(|entry| entry.course.clone())
    }

    pub fn list_courses(&self) -> Vec<RestrictedCourseView> {
        let courses = self.courses.read().expect("restrictions lock poisoned");
        let mut views: Vec<RestrictedCourseView> = courses
            .values()
            .map(|entry| RestrictedCourseView {
                course: entry.course.clone(),
                rules: entry
                    .rules
                    .iter()
                    .map(|(country, rule_type)| CountryAccessRule {
                        course_key: entry.course.course_key.clone(),
                        country: country.clone(),
                        rule_type: *rule_type,
                    })
                    .collect(),
            })
            .collect();
        views.sort_by_key(|v| v.course.course_key.to_string());
        views
    }

    pub fn is_restricted(&self, key: &CourseKey) -> bool {
        self.courses
            .read()
            .expect("restrictions lock poisoned")
            .contains_key(key)
    }

    pub fn is_disabled_access_check(&self, key: &CourseKey) -> bool {
        self.get_course(key)
            .is_some_and(|course| course.disable_access_check)
    }

    /// Country access for a course. Unrestricted courses admit everyone.
    pub fn country_access(&self, key: &CourseKey) -> Arc<CountryAccess> {
        if let Some(cached) = self.access_cache.get(key) {
            return Arc::clone(&cached);
        }

        debug!(course = %key, "country access cache miss");
        // Fill the cache under the read lock so a concurrent write cannot
        // invalidate before a stale answer lands.
        let courses = self.courses.read().expect("restrictions lock poisoned");
        let access = match courses.get(key) {
            Some(entry) => Arc::new(CountryAccess::from_rules(&entry.rules)),
            None => Arc::new(CountryAccess::default()),
        };
        self.access_cache.insert(key.clone(), Arc::clone(&access));
        access
    }

    /// Whether `country` may access `key`. Empty or malformed codes are
    /// treated as unknown and admitted.
    pub fn check_country_access(&self, key: &CourseKey, country: Option<&str>) -> bool {
        let country = country.and_then(|c| c.parse::<Country>().ok());
        self.country_access(key).allows(country.as_ref())
    }

    /// The blocked-message URL for a course at an access point, falling back
    /// to the `default` message for courses that are not restricted.
    pub fn message_url_path(&self, key: &CourseKey, access_point: AccessPoint) -> String {
        let cache_key = (key.clone(), access_point);
        if let Some(cached) = self.message_cache.get(&cache_key) {
            return cached.clone();
        }

        debug!(course = %key, %access_point, "message url cache miss");
        let courses = self.courses.read().expect("restrictions lock poisoned");
        let message_key = courses
            .get(key)
            .map_or("default", |entry| entry.course.message_key(access_point));
        let path = messages::blocked_message_path(access_point, message_key);
        self.message_cache.insert(cache_key, path.clone());
        path
    }

    fn invalidate(&self, key: &CourseKey) {
        self.access_cache.remove(key);
        self.message_cache.retain(|(course, _), _| course != key);
    }

    /// Drop every cached answer.
    pub fn clear_cache(&self) {
        self.access_cache.clear();
        self.message_cache.clear();
    }
}

impl Default for RestrictionStore {
    fn default() -> Self {
        Self::new()
    }
}
