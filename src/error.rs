// error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::snapshot::SnapshotError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No request")]
    NoRequest,
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Light server is not connected")]
    BackendUnavailable,
    #[error("Light server did not answer in time")]
    BackendTimeout,
    #[error("Light server connection was taken over by a newer registration")]
    BackendReplaced,
    #[error("Light server disconnected before answering")]
    BackendGone,
    #[error("Template not found: {0}")]
    TemplateNotFound(String),
    #[error("Module not found: {0}")]
    ModuleNotFound(String),
    #[error("Config XML error: {0}")]
    ConfigXml(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NoRequest | AppError::UnknownOperation(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BackendUnavailable | AppError::BackendReplaced | AppError::BackendGone => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::BackendTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::TemplateNotFound(_) | AppError::ModuleNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConfigXml(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used for the failure counter.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::NoRequest => "no_request",
            AppError::UnknownOperation(_) => "unknown_operation",
            AppError::Validation(_) => "validation",
            AppError::BackendUnavailable => "backend_unavailable",
            AppError::BackendTimeout => "backend_timeout",
            AppError::BackendReplaced => "backend_replaced",
            AppError::BackendGone => "backend_gone",
            AppError::TemplateNotFound(_) => "template_not_found",
            AppError::ModuleNotFound(_) => "module_not_found",
            AppError::ConfigXml(_) => "config_xml",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(ref e) = self {
            tracing::error!("Internal error: {:#}", e);
        }
        (self.status(), self.to_string()).into_response()
    }
}

/// Failures seen by the dashboard client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request was rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("Unknown device {0}")]
    UnknownDevice(usize),
    #[error("Unknown group {0}")]
    UnknownGroup(String),
    #[error("Undecodable reply: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}
