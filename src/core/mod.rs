mod change_set;
mod context;
mod notifier;
mod observable;
mod registry;
mod scheduler;
mod watcher;


pub use change_set::*;
pub use context::*;
pub use notifier::*;
pub use observable::*;
pub use registry::*;
pub use scheduler::*;
pub use watcher::*;
