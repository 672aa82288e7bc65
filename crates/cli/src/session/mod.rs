//! Session lifecycle: preempt, submit, and wait for reachability.

/// Establish/stop/status orchestration over a scheduler and a sweeper.
pub mod manager;

pub use manager::SessionManager;
