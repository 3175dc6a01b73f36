pub mod error;

pub mod blob_store;
pub mod config;
pub mod engine;
pub mod expiry;
pub mod meta_store;
pub mod validate;

pub use engine::Engine;
pub use error::{EngineError, Result};
