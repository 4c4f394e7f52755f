use weft_coord::CoordError;
use weft_wire::WireError;

/// Errors from route-map and route-manager operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum DirectoryError {
    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("invalid directory entry: {0}")]
    InvalidEntry(String),
}

impl DirectoryError {
    pub fn invalid_entry(message: impl Into<String>) -> Self {
        Self::InvalidEntry(message.into())
    }
}
