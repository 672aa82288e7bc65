//! Configuration file loading and session resolution.
//!
//! The file is JSON and lives at `--config`, `$TUNNEL_CONFIG`, or
//! `<config_dir>/tunnel/config.json`. Every section has defaults so a minimal
//! file only needs a `sessions` entry with a port and host key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tunnel_protocol::{ResourceSpec, Session, TimeLimit};

use crate::error::{Result, TunnelError};
use crate::sweep::SweepRules;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "TUNNEL_CONFIG";

const MAX_SESSION_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
	pub cluster: ClusterSettings,
	pub lifecycle: LifecycleConfig,
	pub endpoint: EndpointSettings,
	pub sweep: SweepRules,
	pub sessions: BTreeMap<String, SessionConfig>,
}

/// How the client reaches the scheduler and compute nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
	/// Host running scheduler commands; `None` runs them locally.
	pub login_host: Option<String>,
	/// Jump host for reaching compute nodes (`ssh -J`).
	pub jump_host: Option<String>,
	pub identity_file: Option<PathBuf>,
	pub ssh_program: String,
	/// Extra `-o` options passed to every ssh invocation.
	pub ssh_options: Vec<String>,
	/// This binary's path on the cluster.
	pub remote_binary: String,
	/// Config path passed to the remote binary; `None` uses its default lookup.
	pub remote_config: Option<PathBuf>,
	pub connect_timeout_secs: u64,
	pub command_timeout_secs: u64,
	/// Extra attempts for a remote sweep after the first one fails.
	pub sweep_retries: u32,
}

impl Default for ClusterSettings {
	fn default() -> Self {
		Self {
			login_host: None,
			jump_host: None,
			identity_file: None,
			ssh_program: "ssh".to_string(),
			ssh_options: Vec::new(),
			remote_binary: "tunnel".to_string(),
			remote_config: None,
			connect_timeout_secs: 10,
			command_timeout_secs: 60,
			sweep_retries: 2,
		}
	}
}

impl ClusterSettings {
	pub fn connect_timeout(&self) -> Duration {
		Duration::from_secs(self.connect_timeout_secs)
	}

	pub fn command_timeout(&self) -> Duration {
		Duration::from_secs(self.command_timeout_secs)
	}

	/// argv prefix invoking this binary on a cluster host.
	pub fn remote_invocation(&self) -> Vec<String> {
		let mut argv = vec![self.remote_binary.clone()];
		if let Some(config) = &self.remote_config {
			argv.push("--config".to_string());
			argv.push(config.display().to_string());
		}
		argv
	}
}

/// Timing of the establish/poll/shutdown protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
	pub poll_interval_ms: u64,
	pub startup_timeout_secs: u64,
	/// Upper bound on waiting for cancelled allocations to retire.
	pub cancel_settle_secs: u64,
	/// Lead time of the preemption-imminent signal before the time limit.
	pub signal_margin_secs: u64,
	/// Time the endpoint gets to exit after SIGTERM during shutdown.
	pub shutdown_grace_secs: u64,
}

impl Default for LifecycleConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: 2_000,
			startup_timeout_secs: 300,
			cancel_settle_secs: 30,
			signal_margin_secs: 120,
			shutdown_grace_secs: 20,
		}
	}
}

impl LifecycleConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn startup_timeout(&self) -> Duration {
		Duration::from_secs(self.startup_timeout_secs)
	}

	pub fn cancel_settle(&self) -> Duration {
		Duration::from_secs(self.cancel_settle_secs)
	}

	pub fn signal_margin(&self) -> Duration {
		Duration::from_secs(self.signal_margin_secs)
	}

	pub fn shutdown_grace(&self) -> Duration {
		Duration::from_secs(self.shutdown_grace_secs)
	}
}

/// Endpoint process launched inside the allocation.
///
/// `{port}` and `{host_key}` are substituted inside each argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
	pub program: String,
	pub args: Vec<String>,
}

impl Default for EndpointSettings {
	fn default() -> Self {
		Self {
			program: "/usr/sbin/sshd".to_string(),
			args: ["-D", "-e", "-p", "{port}", "-h", "{host_key}", "-o", "PidFile=none"]
				.into_iter()
				.map(str::to_string)
				.collect(),
		}
	}
}

impl EndpointSettings {
	/// Arguments with placeholders filled in.
	pub fn render_args(&self, port: u16, host_key: &Path) -> Vec<String> {
		let port = port.to_string();
		let host_key = host_key.display().to_string();
		self.args
			.iter()
			.map(|arg| arg.replace("{port}", &port).replace("{host_key}", &host_key))
			.collect()
	}
}

/// One session as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
	/// Defaults to the invoking user.
	pub owner: Option<String>,
	pub partition: Option<String>,
	pub account: Option<String>,
	pub cpus: u32,
	pub memory: String,
	pub time_limit: String,
	pub gpus: Option<String>,
	pub port: u16,
	pub host_key: Option<PathBuf>,
	pub log_path: String,
	pub host_alias: Option<String>,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			owner: None,
			partition: None,
			account: None,
			cpus: 1,
			memory: "4G".to_string(),
			time_limit: "8:00:00".to_string(),
			gpus: None,
			port: 0,
			host_key: None,
			log_path: "%x-%j.log".to_string(),
			host_alias: None,
		}
	}
}

impl TunnelConfig {
	/// Default location under the user config directory.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("tunnel").join("config.json"))
	}

	/// Picks the explicit path, then `$TUNNEL_CONFIG`, then the default.
	pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
		if let Some(path) = explicit {
			return Ok(path.to_path_buf());
		}
		if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
			return Ok(PathBuf::from(path));
		}
		Self::default_path().ok_or_else(|| TunnelError::config("cannot determine config directory; pass --config"))
	}

	pub fn load(path: &Path) -> Result<Self> {
		let content = match std::fs::read_to_string(path) {
			Ok(content) => content,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				return Err(TunnelError::config(format!("config file {} not found", path.display())));
			}
			Err(err) => return Err(err.into()),
		};
		Self::from_json(&content).map_err(|err| match err {
			TunnelError::Configuration(msg) => TunnelError::config(format!("{}: {msg}", path.display())),
			other => other,
		})
	}

	pub fn from_json(content: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(content).map_err(|err| TunnelError::config(format!("invalid config: {err}")))?;
		config.validate()?;
		Ok(config)
	}

	/// Checks settings that do not depend on a particular session.
	pub fn validate(&self) -> Result<()> {
		if self.lifecycle.poll_interval_ms == 0 {
			return Err(TunnelError::config("lifecycle.poll_interval_ms must be positive"));
		}
		if self.cluster.command_timeout_secs == 0 || self.cluster.connect_timeout_secs == 0 {
			return Err(TunnelError::config("cluster timeouts must be positive"));
		}
		if self.endpoint.program.trim().is_empty() {
			return Err(TunnelError::config("endpoint.program must not be empty"));
		}
		let budget = self.shutdown_budget();
		if budget >= self.lifecycle.signal_margin() {
			return Err(TunnelError::config(format!(
				"shutdown needs up to {}s (grace {}s plus sweep kill grace) but the signal margin is {}s",
				budget.as_secs(),
				self.lifecycle.shutdown_grace_secs,
				self.lifecycle.signal_margin_secs
			)));
		}
		self.sweep.compile().map(|_| ())
	}

	/// Worst-case time from the preemption signal until the second sweep is done:
	/// the endpoint's grace, then SIGTERM and SIGKILL waits in the sweep.
	pub fn shutdown_budget(&self) -> Duration {
		let sweep_secs = self.sweep.kill_grace_ms.saturating_mul(2).div_ceil(1_000);
		Duration::from_secs(self.lifecycle.shutdown_grace_secs.saturating_add(sweep_secs))
	}

	/// Resolves and validates the named session.
	pub fn session(&self, name: &str) -> Result<Session> {
		validate_session_name(name)?;
		let entry = self.sessions.get(name).ok_or_else(|| {
			let known = self.sessions.keys().map(String::as_str).collect::<Vec<_>>().join(", ");
			TunnelError::config(format!("unknown session {name:?} (configured: {known})"))
		})?;

		let time_limit: TimeLimit = entry
			.time_limit
			.parse()
			.map_err(|err| TunnelError::config(format!("session {name:?}: {err}")))?;
		if self.lifecycle.signal_margin() >= time_limit.as_duration() {
			return Err(TunnelError::config(format!(
				"session {name:?}: signal margin of {}s must be shorter than the time limit {time_limit}",
				self.lifecycle.signal_margin_secs
			)));
		}
		if entry.port == 0 {
			return Err(TunnelError::config(format!("session {name:?}: port is required")));
		}
		if entry.cpus == 0 {
			return Err(TunnelError::config(format!("session {name:?}: cpus must be positive")));
		}
		if entry.memory.trim().is_empty() {
			return Err(TunnelError::config(format!("session {name:?}: memory must not be empty")));
		}
		if entry.log_path.trim().is_empty() {
			return Err(TunnelError::config(format!("session {name:?}: log_path must not be empty")));
		}
		let host_key = entry
			.host_key
			.clone()
			.filter(|path| !path.as_os_str().is_empty())
			.ok_or_else(|| TunnelError::config(format!("session {name:?}: host_key is required")))?;

		let owner = match &entry.owner {
			Some(owner) if !owner.trim().is_empty() => owner.clone(),
			_ => invoking_user().ok_or_else(|| TunnelError::config(format!("session {name:?}: cannot determine owner; set it explicitly")))?,
		};

		Ok(Session {
			name: name.to_string(),
			owner,
			resources: ResourceSpec {
				partition: entry.partition.clone(),
				account: entry.account.clone(),
				cpus: entry.cpus,
				memory: entry.memory.clone(),
				time_limit,
				gpus: entry.gpus.clone(),
			},
			port: entry.port,
			host_key,
			log_path: entry.log_path.clone(),
			host_alias: entry.host_alias.clone(),
		})
	}
}

/// Session names double as scheduler job names and name filters.
pub fn validate_session_name(name: &str) -> Result<()> {
	if name.is_empty() || name.len() > MAX_SESSION_NAME_LEN {
		return Err(TunnelError::config(format!("session name must be 1-{MAX_SESSION_NAME_LEN} characters")));
	}
	if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
		return Err(TunnelError::config(format!("session name {name:?} may only contain letters, digits, '-', '_' and '.'")));
	}
	Ok(())
}

/// Login name of the calling user.
pub fn invoking_user() -> Option<String> {
	tunnel_runtime::current_user()
		.map(|user| user.name)
		.or_else(|| std::env::var("USER").ok().filter(|user| !user.is_empty()))
}

/// Expands a leading `~` or `~/` against `home`.
pub fn expand_tilde(path: &Path, home: &Path) -> PathBuf {
	match path.strip_prefix("~") {
		Ok(rest) => home.join(rest),
		Err(_) => path.to_path_buf(),
	}
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	const MINIMAL: &str = r#"{
		"sessions": {
			"tunnel-job": {
				"owner": "alice",
				"partition": "gpu",
				"cpus": 8,
				"memory": "32G",
				"time_limit": "1-00:00:00",
				"port": 50022,
				"host_key": "~/.ssh/tunnel_host_ed25519",
				"log_path": "logs/%x-%j.log"
			}
		}
	}"#;

	fn expect_config_error(result: Result<impl std::fmt::Debug>, needle: &str) {
		match result {
			Err(TunnelError::Configuration(msg)) => assert!(msg.contains(needle), "{msg:?} should mention {needle:?}"),
			other => panic!("expected configuration error, got {other:?}"),
		}
	}

	#[test]
	fn resolves_session_with_defaults_filled_in() {
		let config = TunnelConfig::from_json(MINIMAL).unwrap();
		let session = config.session("tunnel-job").unwrap();
		assert_eq!(session.owner, "alice");
		assert_eq!(session.port, 50022);
		assert_eq!(session.resources.cpus, 8);
		assert_eq!(session.resources.partition.as_deref(), Some("gpu"));
		assert_eq!(session.resources.time_limit.as_duration(), Duration::from_secs(86_400));
		assert_eq!(session.log_path, "logs/%x-%j.log");
		assert_eq!(config.cluster.ssh_program, "ssh");
		assert_eq!(config.lifecycle.poll_interval(), Duration::from_secs(2));
	}

	#[test]
	fn unknown_session_lists_configured_names() {
		let config = TunnelConfig::from_json(MINIMAL).unwrap();
		expect_config_error(config.session("other"), "tunnel-job");
	}

	#[test]
	fn rejects_names_unsafe_for_scheduler_filters() {
		expect_config_error(validate_session_name(""), "1-64");
		expect_config_error(validate_session_name("a,b"), "may only contain");
		expect_config_error(validate_session_name("job name"), "may only contain");
		assert!(validate_session_name("tunnel-job_2.gpu").is_ok());
	}

	#[test]
	fn rejects_missing_port_and_host_key() {
		let config = TunnelConfig::from_json(r#"{"sessions": {"s": {"owner": "bob", "host_key": "/k"}}}"#).unwrap();
		expect_config_error(config.session("s"), "port is required");

		let config = TunnelConfig::from_json(r#"{"sessions": {"s": {"owner": "bob", "port": 2222}}}"#).unwrap();
		expect_config_error(config.session("s"), "host_key is required");
	}

	#[test]
	fn rejects_margin_longer_than_time_limit() {
		let config = TunnelConfig::from_json(
			r#"{"lifecycle": {"signal_margin_secs": 600}, "sessions": {"s": {"owner": "bob", "port": 2222, "host_key": "/k", "time_limit": "10"}}}"#,
		)
		.unwrap();
		expect_config_error(config.session("s"), "signal margin");
	}

	#[test]
	fn rejects_shutdown_that_outlasts_signal_margin() {
		expect_config_error(
			TunnelConfig::from_json(r#"{"lifecycle": {"signal_margin_secs": 60, "shutdown_grace_secs": 600}}"#),
			"signal margin is 60s",
		);
		// 50s grace plus 2 x 5s sweep kill grace lands exactly on the margin.
		expect_config_error(
			TunnelConfig::from_json(r#"{"lifecycle": {"signal_margin_secs": 60, "shutdown_grace_secs": 50}, "sweep": {"kill_grace_ms": 5000}}"#),
			"needs up to 60s",
		);

		let config = TunnelConfig::from_json(r#"{"lifecycle": {"signal_margin_secs": 60, "shutdown_grace_secs": 49}, "sweep": {"kill_grace_ms": 5000}}"#).unwrap();
		assert_eq!(config.shutdown_budget(), Duration::from_secs(59));
		assert_eq!(TunnelConfig::default().shutdown_budget(), Duration::from_secs(24));
	}

	#[test]
	fn rejects_bad_time_limit_and_sweep_regex() {
		let config = TunnelConfig::from_json(r#"{"sessions": {"s": {"owner": "bob", "port": 2222, "host_key": "/k", "time_limit": "forever"}}}"#).unwrap();
		expect_config_error(config.session("s"), "invalid time limit");

		let config = TunnelConfig::from_json(r#"{"sessions": {"s": {"owner": "bob", "port": 2222, "host_key": "/k", "time_limit": "999999999999999-0"}}}"#).unwrap();
		expect_config_error(config.session("s"), "out of range");

		expect_config_error(TunnelConfig::from_json(r#"{"sweep": {"patterns": ["(unclosed"]}}"#), "pattern");
	}

	#[test]
	fn load_reports_missing_file_as_configuration_error() {
		let temp = TempDir::new().unwrap();
		expect_config_error(TunnelConfig::load(&temp.path().join("absent.json")), "not found");

		let path = temp.path().join("config.json");
		std::fs::write(&path, "{ not json").unwrap();
		expect_config_error(TunnelConfig::load(&path), "config.json");
	}

	#[test]
	fn endpoint_args_substitute_per_argument() {
		let settings = EndpointSettings::default();
		let args = settings.render_args(50022, Path::new("/home/alice/.ssh/key with space"));
		assert_eq!(args[3], "50022");
		assert_eq!(args[5], "/home/alice/.ssh/key with space");
	}

	#[test]
	fn remote_invocation_includes_remote_config() {
		let mut cluster = ClusterSettings::default();
		assert_eq!(cluster.remote_invocation(), vec!["tunnel"]);
		cluster.remote_config = Some(PathBuf::from("/shared/tunnel.json"));
		assert_eq!(cluster.remote_invocation(), vec!["tunnel", "--config", "/shared/tunnel.json"]);
	}

	#[test]
	fn tilde_expansion() {
		let home = Path::new("/home/alice");
		assert_eq!(expand_tilde(Path::new("~/.ssh/key"), home), PathBuf::from("/home/alice/.ssh/key"));
		assert_eq!(expand_tilde(Path::new("~"), home), PathBuf::from("/home/alice"));
		assert_eq!(expand_tilde(Path::new("/etc/ssh/key"), home), PathBuf::from("/etc/ssh/key"));
	}
}
