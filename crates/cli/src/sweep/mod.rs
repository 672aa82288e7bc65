//! Best-effort removal of stale endpoint processes and lock artifacts.
//!
//! A crashed or force-killed endpoint can leave lock markers on the shared
//! home filesystem that block every later endpoint. Sweeps therefore run on
//! the node of an allocation about to be cancelled ([`node`]) and locally
//! inside each fresh allocation, before the endpoint binds and again on
//! shutdown ([`sweep_local`]). Sweeps never fail; problems become warnings
//! in the [`SweepReport`].

pub mod node;

use std::path::PathBuf;
use std::time::Duration;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tunnel_runtime::{ProcessInfo, UserRecord};

use crate::error::{Result, TunnelError};

pub use node::{NodeSweeper, RecordingSweeper, SshSweeper};

/// Which processes and files count as endpoint leftovers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepRules {
	/// Program names matched exactly against argv[0]'s basename (or comm).
	///
	/// Exact matching keeps unrelated processes whose names merely contain
	/// the primary binary's name alive.
	pub exact_names: Vec<String>,
	/// Regexes matched against the full command line of helper processes.
	pub patterns: Vec<String>,
	/// Lock markers; relative globs are anchored at the owner's home.
	pub lock_globs: Vec<String>,
	/// IPC socket artifacts; `{uid}` expands to the owner's uid.
	pub ipc_globs: Vec<String>,
	/// Time a process gets between SIGTERM and SIGKILL.
	pub kill_grace_ms: u64,
}

impl Default for SweepRules {
	fn default() -> Self {
		let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
		Self {
			exact_names: strings(&["code", "code-insiders"]),
			patterns: strings(&[r"\.vscode-server/", r"\.vscode-server-insiders/", r"vscode-ipc-"]),
			lock_globs: strings(&[".vscode-server/bin/*/vscode-remote-lock.*", ".vscode-server/cli/servers/*/*.lock", ".vscode-server/**/*.lock"]),
			ipc_globs: strings(&["/run/user/{uid}/vscode-ipc-*.sock", "/run/user/{uid}/vscode-git-*.sock", "/tmp/vscode-ipc-*.sock"]),
			kill_grace_ms: 2_000,
		}
	}
}

impl SweepRules {
	/// Compiles the process rules; invalid regexes are configuration errors.
	pub fn compile(&self) -> Result<ProcessRules> {
		let patterns = self
			.patterns
			.iter()
			.map(|pattern| Regex::new(pattern).map_err(|err| TunnelError::config(format!("invalid sweep pattern {pattern:?}: {err}"))))
			.collect::<Result<Vec<_>>>()?;
		Ok(ProcessRules {
			exact_names: self.exact_names.clone(),
			patterns,
		})
	}

	pub fn kill_grace(&self) -> Duration {
		Duration::from_millis(self.kill_grace_ms)
	}

	/// Lock and IPC globs resolved for `user`.
	pub fn artifact_globs(&self, user: &UserRecord) -> Vec<String> {
		let home = glob::Pattern::escape(&user.home.to_string_lossy());
		let uid = user.uid.to_string();
		self.lock_globs
			.iter()
			.chain(&self.ipc_globs)
			.map(|pattern| pattern.replace("{uid}", &uid).replace("{user}", &user.name))
			.map(|pattern| {
				if pattern.starts_with('/') {
					pattern
				} else {
					format!("{}/{}", home.trim_end_matches('/'), pattern)
				}
			})
			.collect()
	}
}

/// Compiled process-matching half of [`SweepRules`].
#[derive(Debug, Clone)]
pub struct ProcessRules {
	exact_names: Vec<String>,
	patterns: Vec<Regex>,
}

/// Why a process was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
	ExactName,
	Pattern,
}

impl ProcessRules {
	pub fn classify(&self, process: &ProcessInfo) -> Option<MatchKind> {
		let name = process.program_name();
		if self.exact_names.iter().any(|exact| exact == name || *exact == process.comm) {
			return Some(MatchKind::ExactName);
		}
		if process.cmdline.is_empty() {
			return None;
		}
		let command_line = process.command_line();
		self.patterns.iter().any(|re| re.is_match(&command_line)).then_some(MatchKind::Pattern)
	}
}

/// Processes owned by `uid` matching `rules`, excluding `protected` pids.
pub fn select_targets<'a>(table: &'a [ProcessInfo], uid: u32, rules: &ProcessRules, protected: &[u32]) -> Vec<(&'a ProcessInfo, MatchKind)> {
	table
		.iter()
		.filter(|process| process.uid == uid && !protected.contains(&process.pid))
		.filter_map(|process| rules.classify(process).map(|kind| (process, kind)))
		.collect()
}

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
	pub owner: String,
	pub terminated: Vec<u32>,
	pub killed: Vec<u32>,
	pub removed: Vec<PathBuf>,
	pub warnings: Vec<String>,
}

impl SweepReport {
	fn warn(&mut self, message: String) {
		warn!(target: "tunnel.sweep", owner = %self.owner, "{message}");
		self.warnings.push(message);
	}
}

/// Sweeps this host for `owner`'s endpoint leftovers. Never fails.
pub fn sweep_local(rules: &SweepRules, owner: &str) -> SweepReport {
	let mut report = SweepReport {
		owner: owner.to_string(),
		..SweepReport::default()
	};

	let Some(user) = tunnel_runtime::lookup_user(owner) else {
		report.warn(format!("unknown user {owner:?}; nothing swept"));
		return report;
	};

	match rules.compile() {
		Ok(process_rules) => terminate_matching(&process_rules, &user, rules.kill_grace(), &mut report),
		Err(err) => report.warn(format!("skipping process sweep: {err}")),
	}

	remove_artifacts(&rules.artifact_globs(&user), user.uid, &mut report);

	info!(
		target: "tunnel.sweep",
		owner,
		terminated = report.terminated.len(),
		killed = report.killed.len(),
		removed = report.removed.len(),
		"local sweep finished"
	);
	report
}

fn terminate_matching(rules: &ProcessRules, user: &UserRecord, grace: Duration, report: &mut SweepReport) {
	let table = tunnel_runtime::list_processes();
	let protected = tunnel_runtime::lineage(std::process::id(), &table);
	let targets = select_targets(&table, user.uid, rules, &protected);
	if targets.is_empty() {
		debug!(target: "tunnel.sweep", owner = %user.name, "no matching processes");
		return;
	}

	for (process, kind) in &targets {
		debug!(target: "tunnel.sweep", pid = process.pid, program = process.program_name(), ?kind, "terminating");
	}
	let pids: Vec<u32> = targets.iter().map(|(process, _)| process.pid).collect();
	let outcome = tunnel_runtime::terminate_all(&pids, grace);
	report.terminated = outcome.terminated;
	report.killed = outcome.killed;
	for pid in outcome.failed {
		report.warn(format!("could not terminate pid {pid}"));
	}
}

/// Deletes regular files and sockets matching `globs` that `uid` owns.
pub fn remove_artifacts(globs: &[String], uid: u32, report: &mut SweepReport) {
	use std::os::unix::fs::MetadataExt;

	for pattern in globs {
		let paths = match glob::glob(pattern) {
			Ok(paths) => paths,
			Err(err) => {
				report.warn(format!("invalid artifact glob {pattern:?}: {err}"));
				continue;
			}
		};

		for path in paths.filter_map(|entry| entry.ok()) {
			let Ok(meta) = std::fs::symlink_metadata(&path) else {
				continue;
			};
			if meta.is_dir() || meta.uid() != uid || report.removed.contains(&path) {
				continue;
			}
			match std::fs::remove_file(&path) {
				Ok(()) => {
					debug!(target: "tunnel.sweep", path = %path.display(), "removed artifact");
					report.removed.push(path);
				}
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
				Err(err) => report.warn(format!("failed to remove {}: {err}", path.display())),
			}
		}
	}
}
