use weft_directory::DirectoryError;
use weft_lifecycle::Disposed;
use weft_wire::{EndPointAddress, WireError};

/// Errors from fabric operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum FabricError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("component is disposed")]
    Disposed,

    #[error("logical end point already present: {0}")]
    AlreadyPresent(EndPointAddress),

    #[error("no reachable replica for {0}")]
    Unreachable(EndPointAddress),

    #[error("reply addressed to {addressed}, this end point is {local}")]
    WrongEndPoint { addressed: String, local: EndPointAddress },

    #[error("message carries no reply address")]
    NoReplyAddress,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl FabricError {
    /// Convenience constructor for transport faults.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl From<Disposed> for FabricError {
    fn from(_: Disposed) -> Self {
        Self::Disposed
    }
}
