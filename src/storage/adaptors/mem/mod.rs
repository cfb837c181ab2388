mod mem_snapshot;
mod mem_storage_engine;

pub use mem_snapshot::*;
pub use mem_storage_engine::*;
