//! Error taxonomy (C11): the HTTP-facing error type the dispatcher (C5)
//! renders. Domain errors from the service (`ServiceError`) and the
//! verifier (`VerifierError`) fold into this one type at the boundary, per
//! spec §7's status table. Non-5xx responses carry `{"error": "..."}`; 5xx
//! bodies are always empty — the cause is logged, never returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::{auth::sigv4::VerifierError, services::object_service::ServiceError};

#[derive(Debug)]
pub enum AppError {
    NotFound,
    InvalidArgument(String),
    PreconditionFailed,
    Unauthorized,
    Io,
    Canceled,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Io => StatusCode::INTERNAL_SERVER_ERROR,
            // 499 has no standard reason phrase but is the conventional
            // "client disconnected / request canceled" status.
            AppError::Canceled => StatusCode::from_u16(499).unwrap(),
        }
    }

    fn public_message(&self) -> Option<&str> {
        match self {
            AppError::NotFound => Some("not found"),
            AppError::InvalidArgument(msg) => Some(msg.as_str()),
            AppError::PreconditionFailed => Some("precondition failed"),
            AppError::Unauthorized => Some("invalid or missing signature"),
            AppError::Io | AppError::Canceled => None,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound => write!(f, "not found"),
            AppError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            AppError::PreconditionFailed => write!(f, "precondition failed"),
            AppError::Unauthorized => write!(f, "unauthorized"),
            AppError::Io => write!(f, "internal error"),
            AppError::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(cause = %self, status = %status.as_u16(), "internal error serving request");
            return (status, ()).into_response();
        }
        let body = self
            .public_message()
            .map(|msg| Json(json!({ "error": msg })));
        match body {
            Some(body) => (status, body).into_response(),
            None => (status, ()).into_response(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound => AppError::NotFound,
            ServiceError::InvalidArgument(msg) => AppError::InvalidArgument(msg),
            ServiceError::PreconditionFailed => AppError::PreconditionFailed,
            ServiceError::Canceled => AppError::Canceled,
            ServiceError::Io(cause) => {
                tracing::error!(cause = %cause, "object service I/O error");
                AppError::Io
            }
        }
    }
}

impl From<VerifierError> for AppError {
    fn from(err: VerifierError) -> Self {
        tracing::warn!(cause = %err, "sigv4 verification rejected request");
        AppError::Unauthorized
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(cause = %err, "unexpected internal error");
        AppError::Io
    }
}
