//! Error taxonomy shared by the core and the HTTP layer.

use crate::paths::{Category, DateBucket};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, warn};

/// Errors returned by capture, session and upload operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Invalid request: {0}")]
    ClientInput(String),

    #[error("No active capture session")]
    NoActiveSession,

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No session ids left for {category} on {date}")]
    SessionsExhausted { category: Category, date: DateBucket },

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl CaptureError {
    pub fn filesystem(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientInput(_) => StatusCode::BAD_REQUEST,
            Self::NoActiveSession => StatusCode::CONFLICT,
            Self::Filesystem { .. } | Self::SessionsExhausted { .. } | Self::TaskFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::ClientInput(_) => "CLIENT_INPUT",
            Self::NoActiveSession => "NO_ACTIVE_SESSION",
            Self::Filesystem { .. } => "FILESYSTEM_ERROR",
            Self::SessionsExhausted { .. } => "SESSIONS_EXHAUSTED",
            Self::TaskFailed(_) => "INTERNAL_ERROR",
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for CaptureError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
        } else {
            warn!(error = %self, code = self.code(), "Request rejected");
        }
        metrics::counter!("capture.requests.failed").increment(1);

        let body = ErrorResponse {
            status: "error",
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
