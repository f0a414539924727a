use std::fmt;
use std::str::FromStr;

use embargo_common::EmbargoError;
use serde::{Deserialize, Serialize};

/// Prefix of every blocked-message URL. Paths under it are never embargoed.
pub const BLOCKED_MESSAGE_PREFIX: &str = "/embargo/blocked-message/";

/// Where an embargo decision is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPoint {
    Enrollment,
    Courseware,
}

impl AccessPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessPoint::Enrollment => "enrollment",
            AccessPoint::Courseware => "courseware",
        }
    }
}

impl fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessPoint {
    type Err = EmbargoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enrollment" => Ok(AccessPoint::Enrollment),
            "courseware" => Ok(AccessPoint::Courseware),
            other => Err(EmbargoError::UnknownAccessPoint(other.to_string())),
        }
    }
}

/// Text shown to a user who was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockedMessage {
    pub key: &'static str,
    pub description: &'static str,
    pub title: &'static str,
    pub body: &'static str,
}

static ENROLLMENT_MESSAGES: &[BlockedMessage] = &[
    BlockedMessage {
        key: "default",
        description: "Default",
        title: "This course is unavailable in your region",
        body: "Our system indicates that you are trying to enroll in a course \
               that is not available in your region.",
    },
    BlockedMessage {
        key: "embargo",
        description: "Embargo",
        title: "Enrollment restricted",
        body: "Enrollment in this course is restricted because of export \
               control regulations.",
    },
];

static COURSEWARE_MESSAGES: &[BlockedMessage] = &[
    BlockedMessage {
        key: "default",
        description: "Default",
        title: "This content is unavailable in your region",
        body: "Our system indicates that you are trying to access course \
               content that is not available in your region.",
    },
    BlockedMessage {
        key: "embargo",
        description: "Embargo",
        title: "Access restricted",
        body: "Access to this content is restricted because of export \
               control regulations.",
    },
];

/// All messages defined for an access point.
pub fn messages_for(access_point: AccessPoint) -> &'static [BlockedMessage] {
    match access_point {
        AccessPoint::Enrollment => ENROLLMENT_MESSAGES,
        AccessPoint::Courseware => COURSEWARE_MESSAGES,
    }
}

/// Look up a message by access point and key.
pub fn blocked_message(
    access_point: AccessPoint,
    message_key: &str,
) -> Result<&'static BlockedMessage, EmbargoError> {
    messages_for(access_point)
        .iter()
        .find(|m| m.key == message_key)
        .ok_or_else(|| EmbargoError::UnknownMessage {
            access_point: access_point.to_string(),
            message_key: message_key.to_string(),
        })
}

/// URL of the blocked-message page.
pub fn blocked_message_path(access_point: AccessPoint, message_key: &str) -> String {
    format!("{BLOCKED_MESSAGE_PREFIX}{access_point}/{message_key}/")
}
