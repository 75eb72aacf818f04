use thiserror::Error;

/// Construction-time failures. Physical conditions never surface here.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Validation(#[from] validator::ValidationErrors),
}

pub type Result<T> = std::result::Result<T, SimError>;
