use std::fmt;
use std::str::FromStr;

use embargo_common::EmbargoError;
use serde::{Deserialize, Serialize};

const COURSE_V1_PREFIX: &str = "course-v1:";
const COURSES_PATH_PREFIX: &str = "/courses/";

/// Identifies a course run.
///
/// Two textual forms are accepted: `course-v1:Org+Number+Run` and the
/// legacy slash form `Org/Number/Run`. The form is part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseKey {
    org: String,
    number: String,
    run: String,
    legacy: bool,
}

fn valid_component(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '~' | ':'))
}

impl CourseKey {
    pub fn new(org: &str, number: &str, run: &str) -> Result<Self, EmbargoError> {
        Self::build(org, number, run, false)
    }

    fn build(org: &str, number: &str, run: &str, legacy: bool) -> Result<Self, EmbargoError> {
        if ![org, number, run].iter().all(|p| valid_component(p)) {
            return Err(EmbargoError::InvalidCourseKey(format!("{org}/{number}/{run}")));
        }
        Ok(Self {
            org: org.to_string(),
            number: number.to_string(),
            run: run.to_string(),
            legacy,
        })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    /// Extract the course key from a courseware path such as
    /// `/courses/course-v1:edX+DemoX+2024/courseware/`.
    pub fn from_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(COURSES_PATH_PREFIX)?;
        if rest.starts_with(COURSE_V1_PREFIX) {
            let id = rest.split('/').next()?;
            return id.parse().ok();
        }
        let mut parts = rest.splitn(4, '/');
        let (org, number, run) = (parts.next()?, parts.next()?, parts.next()?);
        Self::build(org, number, run, true).ok()
    }
}

impl FromStr for CourseKey {
    type Err = EmbargoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EmbargoError::InvalidCourseKey(s.to_string());

        if let Some(body) = s.strip_prefix(COURSE_V1_PREFIX) {
            let parts: Vec<&str> = body.split('+').collect();
            let [org, number, run] = parts.as_slice() else {
                return Err(invalid());
            };
            return Self::build(org, number, run, false).map_err(|_| invalid());
        }

        let parts: Vec<&str> = s.split('/').collect();
        let [org, number, run] = parts.as_slice() else {
            return Err(invalid());
        };
        Self::build(org, number, run, true).map_err(|_| invalid())
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.legacy {
            write!(f, "{}/{}/{}", self.org, self.number, self.run)
        } else {
            write!(f, "{}{}+{}+{}", COURSE_V1_PREFIX, self.org, self.number, self.run)
        }
    }
}

impl TryFrom<String> for CourseKey {
    type Error = EmbargoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CourseKey> for String {
    fn from(key: CourseKey) -> Self {
        key.to_string()
    }
}

/// An ISO 3166-1 alpha-2 country code, stored upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Country(String);

impl Country {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Country {
    type Err = EmbargoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(EmbargoError::InvalidCountry(s.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Country {
    type Error = EmbargoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Country> for String {
    fn from(country: Country) -> Self {
        country.0
    }
}
