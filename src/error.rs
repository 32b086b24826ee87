//! Error types for restro-gamification

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GamificationError {
    /// Malformed input, rejected before any state mutation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The program instance already has an accrued report
    #[error("Report already submitted for program {program_id}")]
    DuplicateSubmission { program_id: i64 },

    /// Storage unavailable or the unit of work could not commit; safe to retry
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Badge catalog uniqueness (name or point threshold)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GamificationError {
    /// Whether the caller may retry the whole operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, GamificationError::Persistence(_))
    }
}

/// Returns true when a rusqlite error is a UNIQUE / PRIMARY KEY violation
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        ),
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, GamificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_persistence_is_retryable() {
        assert!(GamificationError::Persistence("locked".into()).is_retryable());
        assert!(!GamificationError::DuplicateSubmission { program_id: 1 }.is_retryable());
        assert!(!GamificationError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_duplicate_message_names_program() {
        let err = GamificationError::DuplicateSubmission { program_id: 42 };
        assert_eq!(err.to_string(), "Report already submitted for program 42");
    }
}
