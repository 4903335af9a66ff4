//! Image engine: source storage, derivative cache and on-the-fly transforms
//!
//! The [`ImageEngine`] trait is the only surface an HTTP layer needs.
//! [`FsImageEngine`] implements it over two local directories, renders
//! derivatives with the `image` crate and writes cache entries atomically.

mod engine;
mod error;
mod fs;
mod params;
mod process;
mod types;

pub use engine::ImageEngine;
pub use error::{EngineError, Result};
pub use fs::{EngineOptions, FsImageEngine};
pub use params::{
    Fit, OutputFormat, ParamMap, ParamResolver, Transform, TransformParams, ALLOWED_PARAMS,
    MAX_DIMENSION,
};
pub use process::{DEFAULT_MAX_IMAGE_SIZE, MAX_SOURCE_PIXELS};
pub use types::{ByteStream, CachePath, EngineStats, ImageId};
