use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Error taxonomy shared by every handler and repository.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Database unreachable or not yet selected a server.
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    /// Wraps an arbitrary failure; the cause is logged, never sent to the client.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Upstream(cause) => {
                warn!(%cause, "upstream unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service temporarily unavailable".to_string(),
                )
            }
            ApiError::Internal(cause) => {
                error!(%cause, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

impl From<mongodb::error::Error> for ApiError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match &*err.kind {
            ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
                ApiError::Upstream(err.to_string())
            }
            ErrorKind::Write(write_failure) => {
                // E11000: unique index violation (duplicate username/email).
                if let mongodb::error::WriteFailure::WriteError(we) = write_failure {
                    if we.code == 11000 {
                        return ApiError::Conflict("already exists".to_string());
                    }
                }
                ApiError::Internal(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        let cases = [
            (ApiError::validation("bad id"), StatusCode::BAD_REQUEST),
            (
                ApiError::Conflict("taken".into()),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Unauthenticated("missing token".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApiError::Forbidden("admins only".into()),
                StatusCode::FORBIDDEN,
            ),
            (ApiError::not_found("no such doc"), StatusCode::NOT_FOUND),
            (
                ApiError::Upstream("no server".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::internal("boom"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn internal_body_does_not_echo_the_cause() {
        let response = ApiError::internal("connection refused: secret-host:27017").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("collect body");
        let text = String::from_utf8(body.to_vec()).expect("utf8 body");
        assert!(!text.contains("secret-host"));
        assert!(text.contains("internal server error"));
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let response = ApiError::Conflict("username already taken".into()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("collect body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(json["error"], "username already taken");
    }
}
