//! Data types shared by the session manager and the in-allocation job body.
//!
//! Everything here is plain serde data: sessions as configured, allocations as
//! the scheduler reports them, endpoints derived from running allocations, and
//! the structured job specification handed to the scheduler. Behavior lives in
//! `tunnel-cli`.

pub mod allocation;
pub mod job;
pub mod session;

pub use allocation::*;
pub use job::*;
pub use session::*;
