//! Process and port liveness checks.

use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Returns `true` when a process with `pid` exists and is not a zombie.
pub fn pid_is_alive(pid: u32) -> bool {
	if pid == 0 {
		return false;
	}

	#[cfg(target_os = "linux")]
	{
		if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
			return !is_zombie_stat(&stat);
		}
	}

	let Ok(raw) = i32::try_from(pid) else {
		return false;
	};
	// Signal 0 probes existence; EPERM still means the pid is taken.
	match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
		Ok(()) | Err(nix::errno::Errno::EPERM) => true,
		Err(_) => false,
	}
}

/// Polls until `pid` is gone or `timeout` elapses; returns whether it exited.
pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
	let deadline = Instant::now() + timeout;
	loop {
		if !pid_is_alive(pid) {
			return true;
		}
		let now = Instant::now();
		if now >= deadline {
			return false;
		}
		std::thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
	}
}

/// Returns `true` when `port` can be bound on all interfaces.
pub fn port_available(port: u16) -> bool {
	std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(any(test, target_os = "linux"))]
fn is_zombie_stat(stat: &str) -> bool {
	// comm may contain spaces and parens; the state follows the last ')'.
	stat.rsplit_once(')')
		.and_then(|(_, rest)| rest.split_whitespace().next())
		.is_some_and(|state| state == "Z" || state == "X")
}
