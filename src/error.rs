//! Error type shared by every K-tree operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KTreeError {
    /// Order 2 is rejected too: a root split leaves the new root with two
    /// keys, which is already full at order 2, so splitting never stops.
    #[error("order must be at least 3, got {order}")]
    InvalidOrder { order: usize },

    #[error("max_iterations must be at least 1")]
    InvalidIterationCap,

    #[error("no observations supplied")]
    EmptyObservations,

    #[error("two-means needs at least 2 elements, got {found}")]
    TooFewElements { found: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("snapshot corrupt: {0}")]
    CorruptSnapshot(String),

    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

pub type Result<T> = std::result::Result<T, KTreeError>;
