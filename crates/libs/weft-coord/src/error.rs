/// Errors from coordination-service operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CoordError {
    #[error("node already exists: {0}")]
    AlreadyExists(String),

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("invalid path segment: {0:?}")]
    InvalidSegment(String),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("coordination backend error: {0}")]
    Backend(String),
}

impl CoordError {
    /// Convenience constructor for backend faults.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
