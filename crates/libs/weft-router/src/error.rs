use weft_directory::DirectoryError;
use weft_fabric::FabricError;
use weft_lifecycle::Disposed;
use weft_wire::WireError;

/// Errors from router operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum RouterError {
    #[error("component is disposed")]
    Disposed,

    #[error("handler error: {0}")]
    Handler(String),

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl RouterError {
    /// Convenience constructor for handler-side failures.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

impl From<Disposed> for RouterError {
    fn from(_: Disposed) -> Self {
        Self::Disposed
    }
}
