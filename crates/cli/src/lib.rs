//! Session lifecycle manager for interactive endpoints on a Slurm cluster.
//!
//! `tunnel up <session>` preempts whatever allocation holds the session name,
//! submits a fresh one running `tunnel job`, and waits until it is reachable.
//! Inside the allocation, `tunnel job` sweeps stale state, runs the endpoint,
//! and cleans up again when the scheduler or an operator ends it.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod output;
pub mod scheduler;
pub mod session;
pub mod shell;
pub mod sweep;

pub use error::{Result, SchedulerError, TunnelError};
