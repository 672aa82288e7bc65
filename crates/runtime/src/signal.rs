//! Signal delivery to single processes and process groups.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal as nix_signal;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::debug;

use crate::process::wait_for_exit;

/// Signals the sweeper and job body send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
	Term,
	Kill,
	Int,
	Usr1,
}

impl Signal {
	fn as_nix(self) -> nix_signal::Signal {
		match self {
			Signal::Term => nix_signal::Signal::SIGTERM,
			Signal::Kill => nix_signal::Signal::SIGKILL,
			Signal::Int => nix_signal::Signal::SIGINT,
			Signal::Usr1 => nix_signal::Signal::SIGUSR1,
		}
	}
}

#[derive(Debug, Error)]
pub enum SignalError {
	#[error("no such process {0}")]
	NoSuchProcess(u32),
	#[error("not permitted to signal {0}")]
	PermissionDenied(u32),
	#[error("invalid pid {0}")]
	InvalidPid(u32),
	#[error("signal delivery failed: {0}")]
	Os(#[from] Errno),
}

/// Sends `signal` to `pid`.
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), SignalError> {
	let target = to_pid(pid, 0)?;
	nix_signal::kill(target, signal.as_nix()).map_err(|errno| classify(errno, pid))
}

/// Sends `signal` to every member of process group `pgid`.
pub fn signal_group(pgid: u32, signal: Signal) -> Result<(), SignalError> {
	let target = to_pid(pgid, 1)?;
	nix_signal::killpg(target, signal.as_nix()).map_err(|errno| classify(errno, pgid))
}

fn to_pid(pid: u32, reserved_up_to: i32) -> Result<Pid, SignalError> {
	i32::try_from(pid)
		.ok()
		.filter(|raw| *raw > reserved_up_to)
		.map(Pid::from_raw)
		.ok_or(SignalError::InvalidPid(pid))
}

fn classify(errno: Errno, pid: u32) -> SignalError {
	match errno {
		Errno::ESRCH => SignalError::NoSuchProcess(pid),
		Errno::EPERM => SignalError::PermissionDenied(pid),
		other => SignalError::Os(other),
	}
}

/// Outcome of [`terminate_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
	/// Exited after SIGTERM.
	pub terminated: Vec<u32>,
	/// Needed SIGKILL.
	pub killed: Vec<u32>,
	/// Could not be signalled or survived SIGKILL.
	pub failed: Vec<u32>,
}

/// SIGTERMs every pid, waits up to `grace` for each, then SIGKILLs survivors.
pub fn terminate_all(pids: &[u32], grace: Duration) -> TerminationReport {
	let mut report = TerminationReport::default();
	let mut pending = Vec::new();

	for &pid in pids {
		match send_signal(pid, Signal::Term) {
			Ok(()) => pending.push(pid),
			Err(SignalError::NoSuchProcess(_)) => report.terminated.push(pid),
			Err(err) => {
				debug!(target: "tunnel.runtime", pid, error = %err, "SIGTERM failed");
				report.failed.push(pid);
			}
		}
	}

	for pid in pending {
		if wait_for_exit(pid, grace) {
			report.terminated.push(pid);
			continue;
		}
		debug!(target: "tunnel.runtime", pid, "still alive after grace; sending SIGKILL");
		match send_signal(pid, Signal::Kill) {
			Ok(()) | Err(SignalError::NoSuchProcess(_)) if wait_for_exit(pid, grace) => report.killed.push(pid),
			_ => report.failed.push(pid),
		}
	}

	report
}

#[cfg(test)]
mod tests {
	use std::process::Command;

	use super::*;

	#[test]
	fn rejects_pid_zero() {
		assert!(matches!(send_signal(0, Signal::Term), Err(SignalError::InvalidPid(0))));
		assert!(matches!(signal_group(1, Signal::Term), Err(SignalError::InvalidPid(1))));
	}

	#[test]
	fn terminates_running_child() {
		let mut child = Command::new("sleep").arg("30").spawn().unwrap();
		let pid = child.id();
		let reaper = std::thread::spawn(move || child.wait());

		let report = terminate_all(&[pid], Duration::from_secs(5));
		assert_eq!(report.terminated, vec![pid]);
		assert!(report.failed.is_empty());
		assert!(reaper.join().unwrap().is_ok());
	}

	#[test]
	fn vanished_pid_counts_as_terminated() {
		let mut child = Command::new("true").spawn().unwrap();
		let pid = child.id();
		child.wait().unwrap();
		let report = terminate_all(&[pid], Duration::from_millis(100));
		assert_eq!(report.terminated, vec![pid]);
	}
}
