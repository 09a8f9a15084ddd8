use crate::domain::models::FieldError;
use thiserror::Error;

const SAVE_FAILED_MESSAGE: &str = "failed to save, please try again";

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Application state unavailable: {0}")]
    StateUnavailable(String),
}

impl From<FieldError> for InfraError {
    fn from(error: FieldError) -> Self {
        Self::Validation {
            field: error.field,
            message: error.message,
        }
    }
}

impl InfraError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Json(_) | Self::Sqlite(_) | Self::Storage(_)
        )
    }

    /// Message shown to the user. Storage failures collapse to a generic
    /// retry hint; everything else carries its own explanation.
    pub fn user_message(&self) -> String {
        if self.is_persistence_failure() {
            SAVE_FAILED_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}
