use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("check with name '{0}' already exists")]
    DuplicateName(String),

    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("check store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}
