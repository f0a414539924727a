//! Embargo rules: restricted courses, country access rules, blocked
//! messages and the request-level decision that ties them to the IP filter
//! and GeoIP lookups.

mod access;
mod course_key;
pub mod messages;
mod restrictions;

pub use access::{
    AllowReason, BlockReason, Decision, EmbargoPolicy, UserContext, COURSE_ACCESS_API_PREFIX,
};
pub use course_key::{Country, CourseKey};
pub use messages::{blocked_message, blocked_message_path, AccessPoint, BlockedMessage};
pub use restrictions::{
    CountryAccess, CountryAccessRule, RestrictedCourse, RestrictedCourseView, RestrictionStore,
};
