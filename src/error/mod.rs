use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

pub const VALIDATION_INVALID_INPUT: &str = "VALIDATION/INVALID_INPUT";
pub const RECORD_NOT_FOUND: &str = "RECORD/NOT_FOUND";
pub const RECORD_CONFLICT: &str = "RECORD/CONFLICT";
pub const QUERY_RETRIEVAL_FAILED: &str = "QUERY/RETRIEVAL_FAILED";
pub const UPDATE_FAILED: &str = "UPDATE/FAILED";

/// Failures raised by the record-access engine.
///
/// The `Display` text of each variant is safe to show to callers. Anything
/// more specific (compiled SQL, storage messages) is logged where the
/// failure is caught and never carried in the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation {
        field: Option<String>,
        message: String,
    },
    #[error("Record not found.")]
    NotFound { id: String },
    #[error("A record with the same value already exists.")]
    Conflict { column: Option<String> },
    #[error("Records could not be retrieved.")]
    RetrievalFailure,
    #[error("The record could not be updated.")]
    UpdateFailure,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: None,
            message: message.into(),
        }
    }

    /// Machine readable code matching the [`AppError`] wire shape.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => VALIDATION_INVALID_INPUT,
            EngineError::NotFound { .. } => RECORD_NOT_FOUND,
            EngineError::Conflict { .. } => RECORD_CONFLICT,
            EngineError::RetrievalFailure => QUERY_RETRIEVAL_FAILED,
            EngineError::UpdateFailure => UPDATE_FAILED,
        }
    }
}

/// A structured application error that can be serialized and handed to the
/// presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";
    /// Code used when an opaque error is converted.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";

    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }
            if let Some(engine) = err.downcast_ref::<EngineError>() {
                return AppError::from(engine.clone());
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<EngineError> for AppError {
    fn from(error: EngineError) -> Self {
        let app_error = AppError::new(error.code(), error.to_string());
        match error {
            EngineError::Validation {
                field: Some(field), ..
            } => app_error.with_context("field", field),
            EngineError::NotFound { id } => app_error.with_context("id", id),
            EngineError::Conflict {
                column: Some(column),
            } => app_error.with_context("column", column),
            _ => app_error,
        }
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else {
            "JSON/ERROR"
        };

        let mut app_error = AppError::new(code, error.to_string());
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        let column = error.column();
        if column > 0 {
            app_error = app_error.with_context("column", column.to_string());
        }
        app_error
    }
}
