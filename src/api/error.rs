use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::session::SessionError;
use crate::settings::SettingsError;
use crate::store::marked::MarkedError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 404 - Generic not-found.
    NotFound(String),
    /// 404 - A specific session id was not found.
    SessionNotFound(String),
    /// 409 - Marked-files antichain violation or similar conflict.
    Conflict(String),
    /// 502 - A session backend could not be reached.
    BadGateway(String),
    /// 500 - Catch-all internal error. The detail is logged, not surfaced.
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::SessionNotFound(_) => "session_not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::BadGateway(_) => "bad_gateway",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::NotFound(what) => format!("Not found: {}.", what),
            ApiError::SessionNotFound(id) => format!("Session not found: {}.", id),
            ApiError::Conflict(detail) => detail.clone(),
            ApiError::BadGateway(detail) => format!("Upstream failure: {}.", detail),
            // Internal details go to the log; callers get a generic message.
            ApiError::Internal(_) => "Internal error.".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!("internal error: {}", detail);
        }
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => ApiError::SessionNotFound(id),
            SessionError::Keys(e) => ApiError::InvalidRequest(e.to_string()),
            SessionError::CreateFailed(detail) => ApiError::Internal(detail),
            SessionError::SendKeys(e) => ApiError::Internal(format!("send-keys: {}", e)),
        }
    }
}

impl From<MarkedError> for ApiError {
    fn from(err: MarkedError) -> Self {
        match err {
            MarkedError::NotFound(detail) => ApiError::NotFound(detail),
            MarkedError::NotMarkable => {
                ApiError::InvalidRequest("cannot mark this file type".to_string())
            }
            MarkedError::ParentMarked(_) | MarkedError::ChildMarked(_) => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
