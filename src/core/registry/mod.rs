//! Listener registrations and delivery.

mod listener;
mod listener_registry;


pub use listener::*;
pub use listener_registry::*;
