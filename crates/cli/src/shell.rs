//! Command execution on this host or over ssh.
//!
//! Scheduler commands run on the login host and sweeps run on compute
//! nodes; both go through [`RemoteShell`] so quoting, timeouts and the
//! connectivity/diagnostic split live in one place.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::ClusterSettings;
use crate::error::{Result, TunnelError};

/// ssh reserves this status for its own failures.
const SSH_FAILURE_STATUS: i32 = 255;

/// Where a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
	Local,
	/// Login host, reached directly.
	Login(&'a str),
	/// Compute node, reached through the jump host when one is configured.
	Node(&'a str),
}

impl Target<'_> {
	fn label(&self) -> &str {
		match self {
			Target::Local => "localhost",
			Target::Login(host) | Target::Node(host) => *host,
		}
	}
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
	pub status: Option<i32>,
	pub stdout: String,
	pub stderr: String,
}

impl CommandOutput {
	pub fn success(&self) -> bool {
		self.status == Some(0)
	}

	/// Best human-readable explanation of a failure.
	pub fn diagnostic(&self) -> String {
		let stderr = self.stderr.trim();
		if !stderr.is_empty() {
			return stderr.to_string();
		}
		let stdout = self.stdout.trim();
		if !stdout.is_empty() {
			return stdout.to_string();
		}
		match self.status {
			Some(code) => format!("exited with status {code}"),
			None => "terminated by signal".to_string(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct RemoteShell {
	ssh_program: String,
	identity_file: Option<PathBuf>,
	jump_host: Option<String>,
	options: Vec<String>,
	connect_timeout: Duration,
	command_timeout: Duration,
}

impl RemoteShell {
	pub fn new(settings: &ClusterSettings) -> Self {
		Self {
			ssh_program: settings.ssh_program.clone(),
			identity_file: settings.identity_file.clone(),
			jump_host: settings.jump_host.clone().or_else(|| settings.login_host.clone()),
			options: settings.ssh_options.clone(),
			connect_timeout: settings.connect_timeout(),
			command_timeout: settings.command_timeout(),
		}
	}

	/// Full argv for running `argv` at `target`.
	pub fn command_line(&self, target: Target<'_>, argv: &[String]) -> Result<Vec<String>> {
		let (host, via_jump) = match target {
			Target::Local => return Ok(argv.to_vec()),
			Target::Login(host) => (host, false),
			Target::Node(host) => (host, true),
		};

		let remote = shlex::try_join(argv.iter().map(String::as_str))
			.map_err(|err| TunnelError::config(format!("cannot quote remote command {argv:?}: {err}")))?;

		let mut line = vec![
			self.ssh_program.clone(),
			"-o".to_string(),
			"BatchMode=yes".to_string(),
			"-o".to_string(),
			format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
		];
		for option in &self.options {
			line.push("-o".to_string());
			line.push(option.clone());
		}
		if let Some(identity) = &self.identity_file {
			line.push("-i".to_string());
			line.push(identity.display().to_string());
		}
		if via_jump {
			if let Some(jump) = self.jump_host.as_deref().filter(|jump| *jump != host) {
				line.push("-J".to_string());
				line.push(jump.to_string());
			}
		}
		line.push(host.to_string());
		line.push(remote);
		Ok(line)
	}

	/// Runs `argv` at `target`, feeding `stdin` when given.
	///
	/// A non-zero exit of the command itself is returned as output for the
	/// caller to interpret; failing to reach the host is a connectivity error.
	pub async fn run(&self, target: Target<'_>, argv: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
		let line = self.command_line(target, argv)?;
		let Some((program, args)) = line.split_first() else {
			return Err(TunnelError::config("empty command line"));
		};
		debug!(target: "tunnel.remote", host = target.label(), command = %line.join(" "), "running");

		let mut command = Command::new(program);
		command
			.args(args)
			.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let mut child = command.spawn().map_err(|err| match target {
			Target::Local if err.kind() == std::io::ErrorKind::NotFound => TunnelError::config(format!("{program} not found on PATH")),
			_ => TunnelError::connectivity(target.label(), format!("failed to start {program}: {err}")),
		})?;

		let pipe = child.stdin.take();
		let exchange = async move {
			let mut fed = Ok(());
			if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
				fed = match pipe.write_all(input.as_bytes()).await {
					Ok(()) => pipe.shutdown().await,
					Err(err) => Err(err),
				};
			}
			child.wait_with_output().await.map(|output| (fed, output))
		};

		let (fed, output) = tokio::time::timeout(self.command_timeout, exchange)
			.await
			.map_err(|_| TunnelError::connectivity(target.label(), format!("{} timed out after {:?}", argv.join(" "), self.command_timeout)))??;

		let result = CommandOutput {
			status: output.status.code(),
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		};
		trace!(target: "tunnel.remote", status = ?result.status, stdout = %result.stdout.trim(), stderr = %result.stderr.trim(), "finished");

		if let Err(err) = fed {
			if target == Target::Local {
				return Err(err.into());
			}
			return Err(TunnelError::connectivity(target.label(), format!("stdin not accepted ({err}): {}", result.diagnostic())));
		}

		if target != Target::Local && result.status == Some(SSH_FAILURE_STATUS) {
			return Err(TunnelError::connectivity(target.label(), result.diagnostic()));
		}
		Ok(result)
	}
}
