use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// A required attribute is absent from the request data.
    MissingAttribute(String),
    /// An attribute value could not be coerced to its numeric type.
    TypeCoercion {
        /// Attribute name.
        attribute: String,
        /// Raw value as received (rendered as JSON).
        value: String,
        /// Target type (`int` or `float`).
        expected: &'static str,
    },
    /// Malformed invocation event.
    BadRequest(String),
    /// Feature vector width does not match what the model was trained on.
    ShapeMismatch {
        /// Width the model expects.
        expected: usize,
        /// Width that was passed.
        actual: usize,
    },
    /// Object storage read failed for a reason other than "not found".
    StorageRead(String),
    /// Object storage write failed (including exhausted conditional retries).
    StorageWrite(String),
    /// Metrics backend rejected or could not receive a data point.
    MetricsEmit(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// True for failures of the audit/metrics sinks.
    ///
    /// Looks through `WithContext` wrappers.
    pub fn is_sink_failure(&self) -> bool {
        match self {
            AppError::StorageRead(_) | AppError::StorageWrite(_) | AppError::MetricsEmit(_) => {
                true
            }
            AppError::WithContext { source, .. } => source.is_sink_failure(),
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MissingAttribute(name) => write!(f, "Missing attribute: {}", name),
            AppError::TypeCoercion {
                attribute,
                value,
                expected,
            } => write!(
                f,
                "Attribute '{}' has value {} which cannot be read as {}",
                attribute, value, expected
            ),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ShapeMismatch { expected, actual } => write!(
                f,
                "Feature vector has {} elements, model expects {}",
                actual, expected
            ),
            AppError::StorageRead(msg) => write!(f, "Storage read error: {}", msg),
            AppError::StorageWrite(msg) => write!(f, "Storage write error: {}", msg),
            AppError::MetricsEmit(msg) => write!(f, "Metrics emit error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Input problems map to 400 with the full message, sink failures to 502
    /// and internal defects to 500 with a generic message.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MissingAttribute(_)
            | AppError::TypeCoercion { .. }
            | AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::ShapeMismatch { .. } => {
                tracing::error!("Feature contract violated: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::StorageRead(msg) | AppError::StorageWrite(msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Storage service error".to_string())
            }
            AppError::MetricsEmit(msg) => {
                tracing::error!("Metrics error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Metrics service error".to_string())
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                return (**source).clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    /// Converts a JSON decoding error into a `BadRequest`.
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}
