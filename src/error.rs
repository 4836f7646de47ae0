//! Error types for the ownership scheduler.

use crate::types::{SegmentId, TopologyId};
use thiserror::Error;

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the ownership scheduler.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The reconciliation executor is shut down and no longer accepts work.
    #[error("reconciliation rejected: executor is shut down")]
    Rejected,

    /// The data collaborator failed while enumerating schedule candidates.
    #[error("entry enumeration failed: {0}")]
    Enumeration(String),

    /// A topology was offered that is not newer than the current one.
    #[error("stale topology: current {current}, proposed {proposed}")]
    StaleTopology {
        current: TopologyId,
        proposed: TopologyId,
    },

    /// A segment index outside the ring's segment space.
    #[error("segment {segment} out of range (segment count {segment_count})")]
    InvalidSegment {
        segment: SegmentId,
        segment_count: u32,
    },

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short label for the error kind, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Rejected => "rejected",
            Error::Enumeration(_) => "enumeration",
            Error::StaleTopology { .. } => "stale_topology",
            Error::InvalidSegment { .. } => "invalid_segment",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(format!("reconciliation task failed: {e}"))
    }
}
