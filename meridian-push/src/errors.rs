use meridian_core::{ClientId, PatternError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    InvalidPattern(#[from] PatternError),

    #[error("batch index {index} out of range for {total} batches")]
    BatchIndexOutOfRange { index: usize, total: usize },

    #[error("client {client_id} already watches the maximum of {limit} patterns")]
    PatternOverLimit { client_id: ClientId, limit: usize },

    #[error("invalid push configuration: {0}")]
    InvalidConfig(String),

    #[error("push engine stopped")]
    EngineStopped,

    #[error("push engine must be created within a tokio runtime")]
    NoRuntime,
}
