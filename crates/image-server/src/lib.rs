//! On-the-fly image server
//!
//! Serves transformed derivatives of source images from a disk cache that is
//! kept coherent with source timestamps. Requests may be required to carry an
//! HMAC signature.

pub mod body;
pub mod coherency;
pub mod config;
pub mod error;
pub mod handler;
pub mod lock;
pub mod server;
pub mod signature;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{ImageRequestError, Result, ServerError};
pub use handler::{ImageHandler, ImageRequest, ServedImage};
pub use lock::{KeyLock, LocalKeyLock, NoopKeyLock};
pub use server::{create_router, start_server, ServerState, SharedState};
pub use signature::UrlBuilder;
