use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use embargo_rules::CourseKey;

use crate::auth::CurrentUser;

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>{title}</title></head>\
         <body><h1>{title}</h1>{body}</body></html>\n"
    ))
}

/// GET /
pub async fn index() -> Html<String> {
    page("Welcome", "<p>Browse the course catalog.</p>")
}

/// GET /dashboard
pub async fn dashboard(CurrentUser(user): CurrentUser) -> Html<String> {
    let greeting = match user {
        Some(user) => format!("<p>Signed in as {}.</p>", user.username),
        None => "<p>You are not signed in.</p>".to_string(),
    };
    page("Dashboard", &greeting)
}

/// GET /courses/{course_id}/...
///
/// Any syntactically valid course key is served; the embargo layer has
/// already run by the time this handler sees the request.
pub async fn courseware(uri: Uri) -> Response {
    match CourseKey::from_path(uri.path()) {
        Some(course) => page(
            &format!("Course {}", course.number()),
            &format!("<p>Courseware for {course}.</p>"),
        )
        .into_response(),
        None => (StatusCode::NOT_FOUND, page("Not found", "<p>No such course.</p>")).into_response(),
    }
}
