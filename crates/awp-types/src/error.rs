use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decomposition error: {0}")]
    Decomposition(String),

    #[error("Recording region error: {0}")]
    Recording(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Layout error: {0}")]
    Layout(String),

    #[error("Communication error on rank {rank}: {message}")]
    Communication { rank: usize, message: String },

    #[error("Device error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AwpError {
    pub fn comm(rank: usize, message: impl Into<String>) -> Self {
        AwpError::Communication {
            rank,
            message: message.into(),
        }
    }
}

pub type AwpResult<T> = Result<T, AwpError>;
