use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PushError>;

/// Outcome of a failed delivery attempt, as reported by the push executor.
///
/// Retryable failures are re-enqueued by the owning task with the configured
/// retry delay. Terminal failures are logged and discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("push timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("push rejected by client: {0}")]
    Rejected(String),

    #[error("client {0} is disconnected")]
    ClientDisconnected(String),

    #[error("no retry required: {0}")]
    NoRetryRequired(String),

    #[error("push engine stopped")]
    EngineStopped,
}

impl PushError {
    /// Whether the owning task should schedule another delivery attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PushError::Timeout(_) | PushError::Transport(_) | PushError::Rejected(_)
        )
    }
}

/// Invalid watch pattern input, rejected at the call boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern namespace must not be empty")]
    EmptyNamespace,

    #[error("pattern expression must not be empty")]
    EmptyExpression,

    #[error("pattern `{expression}` has an empty segment at position {position}")]
    EmptySegment { expression: String, position: usize },

    #[error("pattern `{expression}`: `**` is only allowed as the last segment")]
    MisplacedSuffixWildcard { expression: String },

    #[error("pattern `{expression}`: segment `{segment}` mixes wildcards and literals")]
    MixedWildcardSegment { expression: String, segment: String },

    #[error("malformed pattern `{0}`, expected `namespace>>expression`")]
    Malformed(String),
}
