//! Error types for the image server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use image_engine::EngineError;
use std::fmt;

/// Why an image request could not be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRequestError {
    /// The source image does not exist (or the path can never name one)
    NotFound,
    BadRequest(String),
    /// Any engine failure while producing or reading the derivative.
    /// Carries the engine's message verbatim.
    Generation(String),
}

impl ImageRequestError {
    pub fn generation(err: EngineError) -> Self {
        ImageRequestError::Generation(err.to_string())
    }
}

impl fmt::Display for ImageRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRequestError::NotFound => write!(f, "Image not found"),
            ImageRequestError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ImageRequestError::Generation(msg) => write!(f, "Not supported: {}", msg),
        }
    }
}

impl std::error::Error for ImageRequestError {}

impl IntoResponse for ImageRequestError {
    fn into_response(self) -> Response {
        match self {
            ImageRequestError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ImageRequestError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ImageRequestError::Generation(msg) => {
                tracing::error!(error = %msg, "Image generation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
            }
        }
    }
}

/// Startup errors
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Engine(EngineError),
    Io(Box<std::io::Error>),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ServerError::Engine(err) => write!(f, "Engine error: {}", err),
            ServerError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Engine(err) => Some(err),
            ServerError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<EngineError> for ServerError {
    fn from(err: EngineError) -> Self {
        ServerError::Engine(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ServerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ServerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_found_has_empty_body() {
        let response = ImageRequestError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_bad_request_carries_message() {
        let response =
            ImageRequestError::BadRequest("Wrong signature".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Wrong signature");
    }

    #[tokio::test]
    async fn test_generation_error_keeps_engine_message() {
        let err = ImageRequestError::generation(EngineError::Decode("truncated file".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            "Unable to decode source image: truncated file"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ServerError::Config("IMAGE_PRESETS is not a JSON object".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: IMAGE_PRESETS is not a JSON object"
        );
    }

    #[test]
    fn test_error_is_debug() {
        let err = ServerError::Config("test".to_string());
        assert!(format!("{:?}", err).contains("Config"));
    }
}
