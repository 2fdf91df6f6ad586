use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one server-to-client stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    Connecting,
    Open,
    Ended,
    Failed(String),
}

impl StreamStatus {
    /// Ended and Failed absorb every later notification.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: &StreamStatus) -> bool {
        match (self, next) {
            (Self::Connecting, Self::Open) => true,
            (Self::Connecting, Self::Ended | Self::Failed(_)) => true,
            (Self::Open, Self::Ended) => true,
            (Self::Open, Self::Failed(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Ended => f.write_str("ended"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Which of the session's streams a notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Updates,
    Metadata,
}
