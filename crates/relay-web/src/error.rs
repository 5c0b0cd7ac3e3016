use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relayd::{IntakeError, LifecycleError};

use crate::model::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {resource}")]
    NotFound { resource: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::NotFound { .. } => StatusCode::NOT_FOUND,
            WebError::Conflict(_) => StatusCode::CONFLICT,
            WebError::Io(_) | WebError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LifecycleError> for WebError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound { task_id } => WebError::NotFound {
                resource: format!("task:{task_id}"),
            },
            LifecycleError::NotCancellable { .. }
            | LifecycleError::NotRetryable { .. }
            | LifecycleError::RetryExhausted { .. }
            | LifecycleError::Transition(_) => WebError::Conflict(err.to_string()),
            LifecycleError::ShuttingDown | LifecycleError::Store(_) => WebError::Internal {
                message: err.to_string(),
            },
        }
    }
}

impl From<IntakeError> for WebError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Signature(_) => WebError::Unauthorized(err.to_string()),
            IntakeError::MissingHeader { .. } | IntakeError::Malformed(_) => {
                WebError::BadRequest(err.to_string())
            }
            IntakeError::Lifecycle(inner) => inner.into(),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
