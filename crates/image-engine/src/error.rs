//! Error types for the image engine

use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// A source image or cache entry does not exist
    NotFound(String),
    /// The requested path cannot be turned into an image identifier
    InvalidPath(String),
    InvalidParam { name: String, reason: String },
    ImageTooLarge { pixels: u64, max_pixels: u64 },
    Decode(String),
    Encode(String),
    Io(Box<std::io::Error>),
    /// A blocking transform task panicked or was cancelled
    Task(String),
}

impl EngineError {
    pub fn invalid_param(name: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidParam {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the error means the file is gone, whichever layer noticed it.
    pub fn is_not_found(&self) -> bool {
        match self {
            EngineError::NotFound(_) => true,
            EngineError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            ),
            _ => false,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotFound(path) => write!(f, "File not found at path: {}", path),
            EngineError::InvalidPath(msg) => write!(f, "Invalid image path: {}", msg),
            EngineError::InvalidParam { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            EngineError::ImageTooLarge { pixels, max_pixels } => write!(
                f,
                "Image size exceeds the maximum allowed size ({} > {} pixels)",
                pixels, max_pixels
            ),
            EngineError::Decode(msg) => write!(f, "Unable to decode source image: {}", msg),
            EngineError::Encode(msg) => write!(f, "Unable to encode image: {}", msg),
            EngineError::Io(err) => write!(f, "IO error: {}", err),
            EngineError::Task(msg) => write!(f, "Image task failed: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(Box::new(err))
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
