//! The job body: the process the scheduler runs inside an allocation.
//!
//! ```text
//! INIT -> SWEEP_LOCAL -> START_ENDPOINT -> RUNNING -> GRACEFUL_SHUTDOWN -> TERMINATED
//!                                                 \-> ENDPOINT_EXITED   -> TERMINATED
//! ```
//!
//! The body waits on the endpoint and on shutdown signals in one `select!`.
//! Preemption warnings, cancellations and interrupts all go through
//! [`JobBody::shutdown`], so the node is cleaned the same way however the
//! allocation ends.

use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use tunnel_runtime::{Signal, SignalError};

use super::shutdown::{ShutdownReason, ShutdownSignals};
use crate::config::EndpointSettings;
use crate::error::{Result, TunnelError};
use crate::sweep::{SweepRules, sweep_local};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
	Init,
	SweepLocal,
	StartEndpoint,
	Running,
	GracefulShutdown,
	EndpointExited,
	Terminated,
}

/// Everything the job body needs, resolved from its arguments and config.
#[derive(Debug, Clone)]
pub struct JobBodyConfig {
	pub session: String,
	pub owner: String,
	pub port: u16,
	pub host_key: PathBuf,
	pub grace: Duration,
	pub endpoint: EndpointSettings,
	pub sweep: SweepRules,
}

/// How the job body ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
	pub exit_code: i32,
	pub reason: Option<ShutdownReason>,
	pub endpoint_pid: Option<u32>,
	pub phases: Vec<JobPhase>,
}

pub struct JobBody {
	config: JobBodyConfig,
	phases: Vec<JobPhase>,
}

impl JobBody {
	pub fn new(config: JobBodyConfig) -> Self {
		Self {
			config,
			phases: vec![JobPhase::Init],
		}
	}

	pub fn phase(&self) -> JobPhase {
		self.phases.last().copied().unwrap_or(JobPhase::Init)
	}

	fn enter(&mut self, phase: JobPhase) {
		debug!(target: "tunnel.job", from = ?self.phase(), to = ?phase, "phase");
		self.phases.push(phase);
	}

	/// Installs signal handlers, then runs until the endpoint exits or a
	/// shutdown signal arrives.
	pub async fn run(self) -> Result<JobOutcome> {
		let mut signals = ShutdownSignals::install()?;
		self.run_until(async move { signals.recv().await }).await
	}

	/// Runs with `shutdown` standing in for signal delivery.
	pub async fn run_until<F>(mut self, shutdown: F) -> Result<JobOutcome>
	where
		F: Future<Output = ShutdownReason>,
	{
		info!(target: "tunnel.job", session = %self.config.session, owner = %self.config.owner, port = self.config.port, "job body starting");

		self.enter(JobPhase::SweepLocal);
		self.sweep().await?;

		self.enter(JobPhase::StartEndpoint);
		let mut child = self.start_endpoint()?;
		let pid = child.id();

		self.enter(JobPhase::Running);
		info!(target: "tunnel.job", pid = pid.unwrap_or_default(), port = self.config.port, "endpoint running");

		tokio::pin!(shutdown);
		tokio::select! {
			status = child.wait() => {
				let status = status?;
				self.enter(JobPhase::EndpointExited);
				let exit_code = exit_code(status);
				warn!(target: "tunnel.job", exit_code, "endpoint exited on its own");
				self.enter(JobPhase::Terminated);
				Ok(JobOutcome {
					exit_code,
					reason: None,
					endpoint_pid: pid,
					phases: self.phases,
				})
			}
			reason = &mut shutdown => {
				self.shutdown(&mut child, reason).await?;
				self.enter(JobPhase::Terminated);
				Ok(JobOutcome {
					exit_code: 0,
					reason: Some(reason),
					endpoint_pid: pid,
					phases: self.phases,
				})
			}
		}
	}

	async fn sweep(&self) -> Result<()> {
		let rules = self.config.sweep.clone();
		let owner = self.config.owner.clone();
		let report = tokio::task::spawn_blocking(move || sweep_local(&rules, &owner)).await.map_err(anyhow::Error::from)?;
		debug!(target: "tunnel.job", terminated = report.terminated.len(), removed = report.removed.len(), "sweep done");
		Ok(())
	}

	fn start_endpoint(&self) -> Result<Child> {
		let settings = &self.config.endpoint;
		let program = which::which(&settings.program)
			.map_err(|err| TunnelError::config(format!("endpoint program {}: {err}", settings.program)))?;
		if !tunnel_runtime::port_available(self.config.port) {
			warn!(target: "tunnel.job", port = self.config.port, "port still in use after sweep");
		}

		let args = settings.render_args(self.config.port, &self.config.host_key);
		debug!(target: "tunnel.job", program = %program.display(), ?args, "starting endpoint");
		let child = Command::new(&program)
			.args(&args)
			.stdin(Stdio::null())
			.process_group(0)
			.kill_on_drop(true)
			.spawn()?;
		Ok(child)
	}

	/// Stops the endpoint's process group, escalating after the grace
	/// period, then sweeps again.
	async fn shutdown(&mut self, child: &mut Child, reason: ShutdownReason) -> Result<()> {
		self.enter(JobPhase::GracefulShutdown);
		info!(target: "tunnel.job", %reason, grace = ?self.config.grace, "shutting down endpoint");

		if let Some(pgid) = child.id() {
			signal_endpoint(pgid, Signal::Term);
			match tokio::time::timeout(self.config.grace, child.wait()).await {
				Ok(status) => debug!(target: "tunnel.job", status = ?status?, "endpoint stopped"),
				Err(_) => {
					warn!(target: "tunnel.job", pid = pgid, "endpoint ignored SIGTERM; killing");
					signal_endpoint(pgid, Signal::Kill);
					child.kill().await?;
				}
			}
		}

		self.sweep().await
	}
}

fn signal_endpoint(pgid: u32, signal: Signal) {
	match tunnel_runtime::signal_group(pgid, signal) {
		Ok(()) | Err(SignalError::NoSuchProcess(_)) => {}
		Err(err) => warn!(target: "tunnel.job", pgid, ?signal, error = %err, "failed to signal endpoint"),
	}
}

/// Shell convention: the exit code, or 128 + signal number.
fn exit_code(status: ExitStatus) -> i32 {
	status.code().or_else(|| status.signal().map(|signal| 128 + signal)).unwrap_or(1)
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	fn config(program: &str, args: &[&str], sweep: SweepRules) -> JobBodyConfig {
		JobBodyConfig {
			session: "tunnel-job".into(),
			owner: "no-such-user-for-tunnel-tests".into(),
			port: 0,
			host_key: PathBuf::from("/nonexistent/host_key"),
			grace: Duration::from_secs(5),
			endpoint: EndpointSettings {
				program: program.into(),
				args: args.iter().map(|s| s.to_string()).collect(),
			},
			sweep,
		}
	}

	fn quiet_rules() -> SweepRules {
		SweepRules {
			exact_names: Vec::new(),
			patterns: Vec::new(),
			lock_globs: Vec::new(),
			ipc_globs: Vec::new(),
			kill_grace_ms: 100,
		}
	}

	#[tokio::test]
	async fn endpoint_exit_status_becomes_job_status() {
		let body = JobBody::new(config("sh", &["-c", "exit 3"], quiet_rules()));
		let outcome = body.run_until(std::future::pending()).await.unwrap();
		assert_eq!(outcome.exit_code, 3);
		assert_eq!(outcome.reason, None);
		assert_eq!(
			outcome.phases,
			vec![JobPhase::Init, JobPhase::SweepLocal, JobPhase::StartEndpoint, JobPhase::Running, JobPhase::EndpointExited, JobPhase::Terminated]
		);
	}

	#[tokio::test]
	async fn killed_endpoint_reports_signal_status() {
		let body = JobBody::new(config("sh", &["-c", "kill -9 $$"], quiet_rules()));
		let outcome = body.run_until(std::future::pending()).await.unwrap();
		assert_eq!(outcome.exit_code, 128 + 9);
	}

	#[tokio::test]
	async fn shutdown_stops_endpoint_and_sweeps_again() {
		let temp = TempDir::new().unwrap();
		let lock = temp.path().join("endpoint.lock");
		let Some(me) = tunnel_runtime::current_user() else {
			return;
		};
		let rules = SweepRules {
			lock_globs: vec![format!("{}/*.lock", temp.path().display())],
			..quiet_rules()
		};
		let mut config = config("sleep", &["30"], rules);
		config.owner = me.name;

		let (tx, rx) = tokio::sync::oneshot::channel();
		let lock_for_task = lock.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(300)).await;
			std::fs::write(&lock_for_task, "").unwrap();
			let _ = tx.send(ShutdownReason::PreemptionImminent);
		});

		let outcome = JobBody::new(config)
			.run_until(async move { rx.await.unwrap_or(ShutdownReason::Terminated) })
			.await
			.unwrap();

		assert_eq!(outcome.exit_code, 0);
		assert_eq!(outcome.reason, Some(ShutdownReason::PreemptionImminent));
		assert!(outcome.phases.contains(&JobPhase::GracefulShutdown));
		assert!(!tunnel_runtime::pid_is_alive(outcome.endpoint_pid.unwrap()));
		assert!(!lock.exists());
	}

	#[tokio::test]
	async fn missing_endpoint_program_is_a_configuration_error() {
		let body = JobBody::new(config("tunnel-no-such-endpoint", &[], quiet_rules()));
		let err = body.run_until(std::future::pending()).await.unwrap_err();
		assert!(matches!(err, TunnelError::Configuration(_)), "{err:?}");
	}
}
