//! Execution contexts and thread confinement.
//!
//! A listener belongs to the context it was registered from. The registry
//! posts deliveries into that context instead of calling listeners from the
//! watcher thread.

mod execution_context;
mod looper;
mod manual;


pub use execution_context::*;
pub use looper::*;
pub use manual::*;
