//! Pipeline construction errors.
//!
//! Only setup and installation can fail. Everything on the notification path
//! reports through return values instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: &'static str,
    },
    #[error("failed to spawn consumer thread: {0}")]
    ConsumerSpawn(#[from] std::io::Error),
    #[error("a global pipeline is already installed")]
    AlreadyInstalled,
    #[error("no global pipeline is installed")]
    NotInstalled,
}
