use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Staging error: {0}")]
    Staging(String),

    /// The command could not be built or exited unsuccessfully. `output` holds
    /// the combined stdout/stderr captured so far.
    #[error("Execution error: {message}")]
    Execution { message: String, output: String },

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Variable error: {0}")]
    Variable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProxyError {
    pub fn execution(message: impl Into<String>) -> Self {
        ProxyError::Execution {
            message: message.into(),
            output: String::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
