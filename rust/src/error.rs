use crate::backend::BackendError;

/// Invariant violations raised by the page-loading helpers and key parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("index range {start}..={end} out of bounds for {len} message ids")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },
    #[error("backend returned {got} records for a page of {expected} message ids")]
    PageLengthMismatch { expected: usize, got: usize },
    #[error("invalid page key: {0}")]
    InvalidPageKey(String),
    #[error("invalid message key: {0}")]
    InvalidMessageKey(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
