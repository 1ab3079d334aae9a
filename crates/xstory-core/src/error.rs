//! Error types for the xstory core library.

use thiserror::Error;

/// Core error types for story tree operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid story ID: {0}")]
    InvalidStoryId(String),

    #[error("Parent not found: {0}")]
    ParentNotFound(String),

    #[error("Duplicate story ID: {0}")]
    DuplicateId(String),

    #[error("Story not found: {0}")]
    NodeNotFound(String),

    #[error("Story {0} has children and cannot be deleted")]
    HasChildren(String),

    #[error("Story {id} is not deletable: {reason}")]
    NotDeletable { id: String, reason: String },

    #[error("Invalid transition for {id}: {reason}")]
    InvalidTransition { id: String, reason: String },

    #[error("Closure integrity violation: {0} (run a path rebuild)")]
    IntegrityViolation(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_transition(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidTransition {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that signal a bug in the store rather than a bad call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::IntegrityViolation(_))
    }

    /// True for single-operation rejections that leave state untouched.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InvalidStoryId(_)
                | Error::ParentNotFound(_)
                | Error::DuplicateId(_)
                | Error::NodeNotFound(_)
                | Error::HasChildren(_)
                | Error::NotDeletable { .. }
                | Error::InvalidTransition { .. }
        )
    }
}

/// Result type alias using the xstory Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::IntegrityViolation("missing self-edge".into()).is_fatal());
        assert!(!Error::IntegrityViolation("x".into()).is_recoverable());
        assert!(Error::invalid_transition("1", "released").is_recoverable());
        assert!(!Error::DuplicateId("1".into()).is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::invalid_transition("1.2", "node is disposed (rejected)");
        assert_eq!(
            err.to_string(),
            "Invalid transition for 1.2: node is disposed (rejected)"
        );
    }
}
