//! # Error Handling
//!
//! Two error types live here, one per layer:
//!
//! - [`CaptureError`] is the engine taxonomy: everything that can go wrong
//!   inside the capture/annotation/save flow. It carries a stable
//!   snake_case code so WebSocket clients can switch on it.
//! - [`AppError`] is the HTTP-surface error. It implements actix's
//!   `ResponseError` and renders a consistent JSON body.
//!
//! Engine code returns `Result<_, CaptureError>`; handlers return
//! `Result<_, AppError>`; the `From` impl bridges the two at the boundary.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors produced by the capture engine itself.
///
/// ## Categories:
/// - **PermissionDenied**: camera/microphone acquisition refused; the flow
///   returns to `Idle` with no stream retained.
/// - **DeviceBusy**: the platform reported the camera as held elsewhere;
///   surfaced like a denial but logged distinctly.
/// - **UnsupportedCapability**: an optional platform feature (dictation) is
///   absent; callers treat this as a disabled feature, never a crash.
/// - **EncoderUnavailable**: no video recorder could be constructed; the
///   session stays live and photo-capable.
/// - **EmptyRecording**: the recorder stopped without emitting any data;
///   blocks saving, the user must re-record.
/// - **UploadFailure**: the upload gateway rejected or failed the save; the
///   artifact and draft are retained for retry.
/// - **InvalidTransition**: a command arrived in a stage where it is not
///   legal; the flow state is left untouched.
/// - **UnknownTag**: a tag outside the fixed vocabulary was toggled; the
///   draft is left untouched.
/// - **SurfaceLost**: the drawing surface or source image is unusable;
///   annotation is disabled for this artifact, capture is unaffected.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    PermissionDenied(String),
    DeviceBusy(String),
    UnsupportedCapability(String),
    EncoderUnavailable(String),
    EmptyRecording,
    UploadFailure(String),
    InvalidTransition { from: String, action: String },
    UnknownTag(String),
    SurfaceLost(String),
}

impl CaptureError {
    /// Stable machine-readable code sent to WebSocket clients.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied(_) => "permission_denied",
            CaptureError::DeviceBusy(_) => "device_busy",
            CaptureError::UnsupportedCapability(_) => "unsupported_capability",
            CaptureError::EncoderUnavailable(_) => "encoder_unavailable",
            CaptureError::EmptyRecording => "empty_recording",
            CaptureError::UploadFailure(_) => "upload_failure",
            CaptureError::InvalidTransition { .. } => "invalid_transition",
            CaptureError::UnknownTag(_) => "unknown_tag",
            CaptureError::SurfaceLost(_) => "surface_lost",
        }
    }

    /// True for failures the client can recover from without reopening the
    /// capture surface (retry, re-record, or ignore).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CaptureError::PermissionDenied(_))
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::PermissionDenied(msg) => write!(f, "Camera permission denied: {}", msg),
            CaptureError::DeviceBusy(msg) => write!(f, "Capture device busy: {}", msg),
            CaptureError::UnsupportedCapability(msg) => write!(f, "Capability unavailable: {}", msg),
            CaptureError::EncoderUnavailable(msg) => write!(f, "No usable video encoder: {}", msg),
            CaptureError::EmptyRecording => write!(f, "Recording stopped with no data"),
            CaptureError::UploadFailure(msg) => write!(f, "Upload failed: {}", msg),
            CaptureError::InvalidTransition { from, action } => {
                write!(f, "Cannot {} from stage {}", action, from)
            }
            CaptureError::UnknownTag(tag) => write!(f, "Unknown tag: {}", tag),
            CaptureError::SurfaceLost(msg) => write!(f, "Drawing surface lost: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Shorthand for engine results.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// HTTP-surface error type.
///
/// ## Error Categories:
/// - **Internal**: server-side problems (500)
/// - **BadRequest**: client sent invalid data (400)
/// - **ConfigError**: configuration problems (500)
/// - **ValidationError**: data validation failed (400)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses with a consistent JSON body:
///
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Port must be greater than 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing failures are client mistakes, not server faults.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Engine errors crossing the HTTP boundary become the closest HTTP class.
impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        match &err {
            CaptureError::InvalidTransition { .. } => AppError::BadRequest(err.to_string()),
            CaptureError::UnsupportedCapability(_) => AppError::BadRequest(err.to_string()),
            CaptureError::UnknownTag(_) => AppError::BadRequest(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
