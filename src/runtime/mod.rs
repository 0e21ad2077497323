//! Runtime primitives: notification streams and loop supervision.

pub mod supervisor;
pub mod watcher;

pub use supervisor::Supervisor;
pub use watcher::{EventHub, Notifier, OwnerKey, Watcher};
