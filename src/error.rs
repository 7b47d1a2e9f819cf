//! Structured error types for the galley layout engine.
//!
//! Only genuine failures live here. Running out of space, colliding with a
//! float, or having a floater rejected are ordinary outcomes of a format
//! call and are reported through [`FormatStatus`](crate::engine::FormatStatus).

use thiserror::Error;

/// The unified error type returned by all fallible galley entry points.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Internal state is malformed: a chain link that must exist is missing,
    /// a handle resolved to the wrong kind of object, and so on. The pass
    /// that hit this must be abandoned.
    #[error("layout invariant violated: {0}")]
    InvariantViolation(String),

    /// A handle outlived the object it referred to.
    #[error("stale {kind} handle")]
    StaleHandle { kind: &'static str },

    /// A format, arrange or visual pass was started while another one was
    /// still running against the same document.
    #[error("a layout pass is already in progress for this document")]
    Reentrant,

    /// The content tree changed underneath an in-progress pass. Reported once
    /// the pass has unwound; the caller must request formatting again.
    #[error("content was modified while a layout pass was in progress")]
    IllegalMutation,

    /// A content operation was rejected (unbalanced removal, position out of
    /// range, unknown element).
    #[error("invalid content operation: {0}")]
    InvalidContent(String),

    /// The layout engine could not complete an operation.
    #[error("layout operation failed: {0}")]
    EngineFailure(String),

    /// JSON input failed to parse as a valid galley document.
    #[error("failed to parse document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
}

impl LayoutError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        LayoutError::InvariantViolation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, LayoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_convert() {
        let err: LayoutError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, LayoutError::InvalidDocument(_)));
        assert!(err.to_string().starts_with("failed to parse document"));
    }

    #[test]
    fn stale_handle_names_kind() {
        let err = LayoutError::StaleHandle { kind: "paragraph" };
        assert_eq!(err.to_string(), "stale paragraph handle");
    }
}
