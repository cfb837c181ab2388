//! Storage collaborator boundary and the in-memory engine.

mod adaptors;
mod file_config;
mod storage_engine;
mod types;

pub use adaptors::*;
pub use file_config::*;
pub use storage_engine::*;
pub use types::*;
