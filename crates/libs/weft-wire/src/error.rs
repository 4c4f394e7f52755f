/// Errors from frame-stack and framing codec operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum WireError {
    #[error("frame truncated: needed {needed} more bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("no frame is visible at the current frame index")]
    NoFrame,

    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("end-point address must not be empty")]
    EmptyEndPointAddress,

    #[error("route hierarchy must not be empty")]
    EmptyRouteHierarchy,

    #[error("unknown envelope kind: {0}")]
    UnknownEnvelopeKind(i32),

    #[error("unknown request kind: {0}")]
    UnknownRequestKind(i32),

    #[error("invalid transport address encoding")]
    InvalidTransportAddress,

    #[error("message truncated at byte {0}")]
    MessageTruncated(usize),
}
