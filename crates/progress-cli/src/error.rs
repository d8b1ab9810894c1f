use progress_core::config::ConfigError;
use progress_core::models::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to format timestamp: {0}")]
    Time(#[from] time::error::Format),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("stage '{0}' is not part of the configured plan")]
    UnknownStage(String),

    #[error("observer registration for task '{0}' was refused")]
    ObserverRefused(String),
}

pub type CliResult<T> = Result<T, CliError>;
