use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("model error: {0}")]
    Model(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("model selection error: {0}")]
    Selection(String),

    #[error("no checkpoints found in {0}")]
    NoCheckpoints(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error(transparent)]
    Core(#[from] minstrel_core::CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("checkpoint glob error: {0}")]
    Glob(#[from] glob::PatternError),
}
