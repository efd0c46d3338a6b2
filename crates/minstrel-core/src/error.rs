use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("class map error: {0}")]
    ClassMap(String),

    #[error("ambiguous raw label {label:?}: listed under both {first:?} and {second:?}")]
    AmbiguousLabel {
        label: String,
        first: String,
        second: String,
    },

    #[error("unknown raw label: {0}")]
    UnknownLabel(String),

    #[error("class index out of range: {0}")]
    UnknownIndex(usize),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("feature error: {0}")]
    Feature(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timer was never started for key {0}")]
    TimerNotStarted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}
