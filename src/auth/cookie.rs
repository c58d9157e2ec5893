use axum::http::{header, HeaderMap};

pub const SESSION_COOKIE: &str = "shomvob_session";

/// `Set-Cookie` value carrying the session token.
pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Path=/; Max-Age={max_age_secs}; HttpOnly; Secure; SameSite=Strict"
    )
}

/// `Set-Cookie` value that expires the session cookie.
pub fn clear_session_cookie() -> String {
    session_cookie("", 0)
}

/// Pulls the session token out of a request: the session cookie is the
/// primary transport, `Authorization: Bearer` the legacy one.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, token)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE && !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::to_string)
}
