use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::{self, Display};
use tracing::error;

pub type AppResult<T> = Result<T, AppError>;

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    BridgeNotConfigured,
    BridgeError,
    BridgeMalformedResponse,
    StorageError,
    SignedUrlFailed,
    ValidationError,
    InternalError,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::BridgeNotConfigured
            | Self::BridgeError
            | Self::BridgeMalformedResponse
            | Self::StorageError
            | Self::SignedUrlFailed
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "Unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden, "Forbidden")
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound, "Resource not found")
    }

    pub fn not_found_with(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn bridge_not_configured() -> Self {
        Self::new(ErrorKind::BridgeNotConfigured, "Bridge is not configured")
    }

    /// A failure reported by the bridge itself, surfaced verbatim.
    pub fn bridge(message: impl Display) -> Self {
        Self::new(ErrorKind::BridgeError, format!("Bridge Error: {message}"))
    }

    pub fn bridge_malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BridgeMalformedResponse, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageError, message)
    }

    pub fn signed_url_failed() -> Self {
        Self::new(ErrorKind::SignedUrlFailed, "Failed to generate signed URL")
    }

    /// Logs the underlying cause and hides it from the caller.
    pub fn internal<E: Display>(error: E) -> Self {
        error!(error = %error, "internal error");
        Self::new(ErrorKind::InternalError, INTERNAL_ERROR_MESSAGE)
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(format!("{value:#}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}
