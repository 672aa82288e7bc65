//! Host-level process helpers used by the sweeper and the job body.
//!
//! Unix only. Linux is the target platform (compute nodes); on other unix
//! systems the process table is empty and sweeps degrade to artifact removal.

#![cfg(unix)]

pub mod proc_table;
pub mod process;
pub mod signal;
pub mod users;

pub use proc_table::{ProcessInfo, list_processes, lineage};
pub use process::{pid_is_alive, port_available, wait_for_exit};
pub use signal::{Signal, SignalError, TerminationReport, send_signal, signal_group, terminate_all};
pub use users::{UserRecord, current_user, lookup_uid, lookup_user};
