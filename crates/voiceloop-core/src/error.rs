use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceloopError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Audio frame error: {0}")]
    Frame(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoiceloopError>;
