//! Snapshot of the host process table.

use std::collections::HashMap;
use std::path::Path;

/// One process as seen in `/proc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
	pub pid: u32,
	pub ppid: u32,
	/// Real uid of the process.
	pub uid: u32,
	/// Kernel command name (truncated to 15 bytes by the kernel).
	pub comm: String,
	pub cmdline: Vec<String>,
}

impl ProcessInfo {
	/// Basename of `argv[0]`, falling back to the kernel command name.
	pub fn program_name(&self) -> &str {
		self.cmdline
			.first()
			.map(|arg0| arg0.rsplit('/').next().unwrap_or(arg0))
			.filter(|name| !name.is_empty())
			.unwrap_or(&self.comm)
	}

	/// Full command line joined by spaces; kernel threads yield `[comm]`.
	pub fn command_line(&self) -> String {
		if self.cmdline.is_empty() {
			format!("[{}]", self.comm)
		} else {
			self.cmdline.join(" ")
		}
	}
}

/// Lists every readable process. Processes that exit mid-scan are skipped.
pub fn list_processes() -> Vec<ProcessInfo> {
	list_processes_in(Path::new("/proc"))
}

pub(crate) fn list_processes_in(root: &Path) -> Vec<ProcessInfo> {
	let Ok(entries) = std::fs::read_dir(root) else {
		return Vec::new();
	};

	let mut processes: Vec<ProcessInfo> = entries
		.filter_map(|entry| entry.ok())
		.filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse::<u32>().ok()))
		.filter_map(|pid| read_process_in(root, pid))
		.collect();
	processes.sort_by_key(|process| process.pid);
	processes
}

fn read_process_in(root: &Path, pid: u32) -> Option<ProcessInfo> {
	let dir = root.join(pid.to_string());
	let status = std::fs::read_to_string(dir.join("status")).ok()?;
	let (ppid, uid) = parse_status(&status)?;
	let comm = std::fs::read_to_string(dir.join("comm")).map(|c| c.trim_end().to_string()).unwrap_or_default();
	let cmdline = std::fs::read(dir.join("cmdline")).map(|raw| parse_cmdline(&raw)).unwrap_or_default();
	Some(ProcessInfo {
		pid,
		ppid,
		uid,
		comm,
		cmdline,
	})
}

fn parse_status(status: &str) -> Option<(u32, u32)> {
	let mut ppid = None;
	let mut uid = None;
	for line in status.lines() {
		if let Some(rest) = line.strip_prefix("PPid:") {
			ppid = rest.trim().parse().ok();
		} else if let Some(rest) = line.strip_prefix("Uid:") {
			uid = rest.split_whitespace().next().and_then(|real| real.parse().ok());
		}
	}
	Some((ppid?, uid?))
}

fn parse_cmdline(raw: &[u8]) -> Vec<String> {
	raw.split(|byte| *byte == 0)
		.filter(|arg| !arg.is_empty())
		.map(|arg| String::from_utf8_lossy(arg).into_owned())
		.collect()
}

/// Returns `pid` and all of its ancestors present in `table`.
pub fn lineage(pid: u32, table: &[ProcessInfo]) -> Vec<u32> {
	let parents: HashMap<u32, u32> = table.iter().map(|p| (p.pid, p.ppid)).collect();
	let mut chain = vec![pid];
	let mut current = pid;
	while let Some(&parent) = parents.get(&current) {
		if parent == 0 || chain.contains(&parent) {
			break;
		}
		chain.push(parent);
		current = parent;
	}
	chain
}
