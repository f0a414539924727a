use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use embargo_rules::{blocked_message, AccessPoint};
use tracing::debug;

/// GET /embargo/blocked-message/{access_point}/{message_key}/
///
/// Always reachable, including from blacklisted addresses.
pub async fn blocked_message_page(
    Path((access_point, message_key)): Path<(String, String)>,
) -> Response {
    let message = access_point
        .parse::<AccessPoint>()
        .and_then(|point| blocked_message(point, &message_key));

    match message {
        Ok(message) => Html(format!(
            "<!DOCTYPE html>\n<html><head><title>{title}</title></head>\
             <body><h1>{title}</h1><p>{body}</p></body></html>\n",
            title = message.title,
            body = message.body
        ))
        .into_response(),
        Err(e) => {
            debug!(%access_point, %message_key, error = %e, "unknown blocked message");
            (StatusCode::NOT_FOUND, Html("<h1>Not found</h1>\n".to_string())).into_response()
        }
    }
}
