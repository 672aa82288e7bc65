//! Slurm implementation of [`Scheduler`] over `sbatch`, `squeue`, `sacct`
//! and `scancel`.

use async_trait::async_trait;
use tracing::{debug, info};
use tunnel_protocol::{AllocationId, AllocationState, AllocationStatus, JobSpec};

use super::Scheduler;
use crate::config::ClusterSettings;
use crate::error::{Result, SchedulerError, TunnelError};
use crate::shell::{CommandOutput, RemoteShell, Target};

/// Runs Slurm commands locally or on the configured login host.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
	shell: RemoteShell,
	login_host: Option<String>,
}

impl SlurmScheduler {
	pub fn new(settings: &ClusterSettings) -> Self {
		Self {
			shell: RemoteShell::new(settings),
			login_host: settings.login_host.clone(),
		}
	}

	fn target(&self) -> Target<'_> {
		match &self.login_host {
			Some(host) => Target::Login(host),
			None => Target::Local,
		}
	}

	async fn run(&self, argv: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
		self.shell.run(self.target(), argv, stdin).await
	}

	async fn sacct_state(&self, id: &AllocationId) -> Result<AllocationStatus> {
		let argv = strings(&["sacct", "--noheader", "--parsable2", "--allocations", &format!("--jobs={id}"), "--format=State,NodeList"]);
		let output = self.run(&argv, None).await?;
		if !output.success() {
			return Err(SchedulerError::QueryFailed(output.diagnostic()).into());
		}
		match output.stdout.lines().find(|line| !line.trim().is_empty()) {
			Some(line) => parse_status_line(id, line),
			None => Ok(AllocationStatus {
				id: id.clone(),
				state: AllocationState::Unknown("NOT_FOUND".to_string()),
				node: None,
			}),
		}
	}
}

#[async_trait]
impl Scheduler for SlurmScheduler {
	async fn submit(&self, spec: &JobSpec) -> Result<AllocationId> {
		let script = batch_script(spec)?;
		let output = self.run(&sbatch_argv(spec), Some(&script)).await?;
		if !output.success() {
			return Err(SchedulerError::SubmissionRejected(output.diagnostic()).into());
		}
		let id = parse_submission(&output.stdout)?;
		info!(target: "tunnel.slurm", allocation = %id, name = %spec.name, "submitted");
		Ok(id)
	}

	async fn query_state(&self, id: &AllocationId) -> Result<AllocationStatus> {
		let argv = strings(&["squeue", "--noheader", &format!("--jobs={id}"), "--format=%T|%N"]);
		let output = self.run(&argv, None).await?;
		if !output.success() && !is_unknown_job(&output) {
			return Err(SchedulerError::QueryFailed(output.diagnostic()).into());
		}

		match output.stdout.lines().find(|line| !line.trim().is_empty()) {
			Some(line) if output.success() => parse_status_line(id, line),
			_ => {
				debug!(target: "tunnel.slurm", allocation = %id, "not in queue; asking accounting");
				self.sacct_state(id).await
			}
		}
	}

	async fn query_by_name(&self, name: &str, owner: &str) -> Result<Vec<AllocationId>> {
		let argv = strings(&["squeue", "--noheader", &format!("--name={name}"), &format!("--user={owner}"), "--format=%i|%T"]);
		let output = self.run(&argv, None).await?;
		if !output.success() {
			return Err(SchedulerError::QueryFailed(output.diagnostic()).into());
		}

		let mut ids = Vec::new();
		for line in output.stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
			let (id, state) = line
				.split_once('|')
				.ok_or_else(|| SchedulerError::Unparseable(format!("squeue line {line:?}")))?;
			if !parse_state(state).is_terminal() {
				ids.push(AllocationId::new(id.trim()));
			}
		}
		debug!(target: "tunnel.slurm", name, owner, found = ids.len(), "looked up allocations by name");
		Ok(ids)
	}

	async fn cancel(&self, id: &AllocationId) -> Result<()> {
		let output = self.run(&strings(&["scancel", id.as_str()]), None).await?;
		if output.success() || is_unknown_job(&output) || is_already_finished(&output) {
			info!(target: "tunnel.slurm", allocation = %id, "cancelled");
			return Ok(());
		}
		Err(SchedulerError::CancelFailed {
			id: id.clone(),
			message: output.diagnostic(),
		}
		.into())
	}
}

fn strings(items: &[&str]) -> Vec<String> {
	items.iter().map(|s| s.to_string()).collect()
}

fn is_unknown_job(output: &CommandOutput) -> bool {
	output.stderr.contains("Invalid job id specified")
}

fn is_already_finished(output: &CommandOutput) -> bool {
	output.stderr.contains("already completing or completed")
}

/// `sbatch` argv for `spec`; the script itself goes on stdin.
pub fn sbatch_argv(spec: &JobSpec) -> Vec<String> {
	let resources = &spec.resources;
	let mut argv = vec![
		"sbatch".to_string(),
		"--parsable".to_string(),
		format!("--job-name={}", spec.name),
		format!("--output={}", spec.log_path),
		format!("--time={}", resources.time_limit.to_scheduler_format()),
		format!("--cpus-per-task={}", resources.cpus),
		format!("--mem={}", resources.memory),
	];
	if let Some(notice) = &spec.preemption {
		argv.push(format!("--signal=B:{}@{}", notice.signal, notice.margin.as_secs()));
	}
	if let Some(partition) = &resources.partition {
		argv.push(format!("--partition={partition}"));
	}
	if let Some(account) = &resources.account {
		argv.push(format!("--account={account}"));
	}
	if let Some(gpus) = &resources.gpus {
		argv.push(format!("--gres=gpu:{gpus}"));
	}
	argv
}

/// Batch script that replaces the batch shell with the job command, so
/// signals sent to the batch step reach it directly.
pub fn batch_script(spec: &JobSpec) -> Result<String> {
	if spec.command.is_empty() {
		return Err(TunnelError::config(format!("job {} has no command", spec.name)));
	}
	let command = shlex::try_join(spec.command.iter().map(String::as_str))
		.map_err(|err| TunnelError::config(format!("cannot quote job command: {err}")))?;
	Ok(format!("#!/bin/sh\nexec {command}\n"))
}

/// `sbatch --parsable` prints `<id>` or `<id>;<cluster>`.
fn parse_submission(stdout: &str) -> Result<AllocationId> {
	stdout
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.last()
		.and_then(|line| line.split(';').next())
		.map(str::trim)
		.filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '_'))
		.map(AllocationId::new)
		.ok_or_else(|| SchedulerError::Unparseable(format!("sbatch output {stdout:?}")).into())
}

fn parse_status_line(id: &AllocationId, line: &str) -> Result<AllocationStatus> {
	let (state, nodes) = line
		.trim()
		.split_once('|')
		.ok_or_else(|| SchedulerError::Unparseable(format!("status line {line:?}")))?;
	Ok(AllocationStatus {
		id: id.clone(),
		state: parse_state(state),
		node: first_node(nodes),
	})
}

/// Maps a Slurm state name (`squeue %T` or `sacct State`) onto the lifecycle
/// states. `sacct` decorations such as `CANCELLED by 1000` or `CANCELLED+`
/// are ignored.
pub fn parse_state(raw: &str) -> AllocationState {
	let name = raw.split_whitespace().next().unwrap_or_default().trim_end_matches('+').to_ascii_uppercase();
	match name.as_str() {
		"PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESIZING" | "SUSPENDED" | "STOPPED" => AllocationState::Pending,
		"RUNNING" => AllocationState::Running,
		"COMPLETING" | "SIGNALING" | "STAGE_OUT" => AllocationState::Completing,
		"COMPLETED" => AllocationState::Completed,
		"FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE" | "PREEMPTED" | "SPECIAL_EXIT" | "REVOKED" => AllocationState::Failed,
		"CANCELLED" => AllocationState::Cancelled,
		_ => AllocationState::Unknown(raw.trim().to_string()),
	}
}

/// First host of a possibly compressed node list (`gpu[03-04,07]` → `gpu03`).
pub fn first_node(list: &str) -> Option<String> {
	let list = list.trim();
	if list.is_empty() || list.starts_with('(') || list.eq_ignore_ascii_case("None assigned") {
		return None;
	}

	let first_comma = list.find(',');
	let node = match list.find('[') {
		Some(open) if first_comma.is_none_or(|comma| open < comma) => {
			let close = open + list[open..].find(']')?;
			let first = list[open + 1..close].split(',').next()?.split('-').next()?;
			let suffix = list[close + 1..].split(',').next().unwrap_or_default();
			format!("{}{first}{suffix}", &list[..open])
		}
		_ => list.split(',').next()?.to_string(),
	};
	Some(node).filter(|node| !node.is_empty())
}

#[cfg(test)]
mod tests {
	use std::os::unix::fs::PermissionsExt;
	use std::time::Duration;

	use tunnel_protocol::{ResourceSpec, TimeLimit};

	use super::*;

	fn spec() -> JobSpec {
		JobSpec::new(
			"tunnel-job",
			ResourceSpec {
				partition: Some("gpu".into()),
				account: None,
				cpus: 8,
				memory: "32G".into(),
				time_limit: "1-00:00:00".parse::<TimeLimit>().unwrap(),
				gpus: Some("a100:1".into()),
			},
			"%x-%j.log",
		)
		.with_preemption("USR1", Duration::from_secs(120))
		.args(["tunnel", "job", "--session", "tunnel-job", "--host-key", "/home/alice/my keys/host"])
	}

	#[test]
	fn sbatch_argv_carries_resources_and_signal() {
		let argv = sbatch_argv(&spec());
		assert_eq!(&argv[..3], &["sbatch", "--parsable", "--job-name=tunnel-job"]);
		assert!(argv.contains(&"--output=%x-%j.log".to_string()));
		assert!(argv.contains(&"--time=1-00:00:00".to_string()));
		assert!(argv.contains(&"--signal=B:USR1@120".to_string()));
		assert!(argv.contains(&"--partition=gpu".to_string()));
		assert!(argv.contains(&"--gres=gpu:a100:1".to_string()));
		assert!(!argv.iter().any(|arg| arg.starts_with("--account")));
	}

	#[test]
	fn batch_script_quotes_every_argument() {
		let script = batch_script(&spec()).unwrap();
		assert!(script.starts_with("#!/bin/sh\nexec tunnel job"));
		assert!(script.contains("'/home/alice/my keys/host'"));
		assert_eq!(shlex::split(script.lines().nth(1).unwrap().trim_start_matches("exec ")).unwrap(), spec().command);
	}

	#[test]
	fn empty_command_is_rejected() {
		let mut spec = spec();
		spec.command.clear();
		assert!(matches!(batch_script(&spec), Err(TunnelError::Configuration(_))));
	}

	#[test]
	fn parses_submission_output() {
		assert_eq!(parse_submission("4242\n").unwrap(), AllocationId::new("4242"));
		assert_eq!(parse_submission("4242;cluster-a\n").unwrap(), AllocationId::new("4242"));
		assert!(matches!(
			parse_submission("Submitted batch job 4242\n"),
			Err(TunnelError::Scheduler(SchedulerError::Unparseable(_)))
		));
	}

	#[test]
	fn maps_slurm_states() {
		assert_eq!(parse_state("PENDING"), AllocationState::Pending);
		assert_eq!(parse_state("RUNNING"), AllocationState::Running);
		assert_eq!(parse_state("COMPLETING"), AllocationState::Completing);
		assert_eq!(parse_state("CANCELLED by 1000"), AllocationState::Cancelled);
		assert_eq!(parse_state("CANCELLED+"), AllocationState::Cancelled);
		assert_eq!(parse_state("TIMEOUT"), AllocationState::Failed);
		assert_eq!(parse_state("NODE_FAIL"), AllocationState::Failed);
		assert_eq!(parse_state("WEIRD"), AllocationState::Unknown("WEIRD".into()));
		assert!(parse_state("WEIRD").is_terminal());
	}

	#[test]
	fn resolves_first_node() {
		assert_eq!(first_node("gpu03").as_deref(), Some("gpu03"));
		assert_eq!(first_node("gpu[03-04,07]").as_deref(), Some("gpu03"));
		assert_eq!(first_node("gpu[07,03]").as_deref(), Some("gpu07"));
		assert_eq!(first_node("cpu01,gpu[03-04]").as_deref(), Some("cpu01"));
		assert_eq!(first_node("").as_deref(), None);
		assert_eq!(first_node("(null)").as_deref(), None);
		assert_eq!(first_node("None assigned").as_deref(), None);
	}

	#[test]
	fn status_line_needs_separator() {
		let id = AllocationId::new("9");
		let status = parse_status_line(&id, "RUNNING|gpu[03-04]").unwrap();
		assert_eq!(status.state, AllocationState::Running);
		assert_eq!(status.node.as_deref(), Some("gpu03"));
		assert_eq!(parse_status_line(&id, "PENDING|").unwrap().node, None);
		assert!(parse_status_line(&id, "RUNNING").is_err());
	}

	fn shim_dir(scripts: &[(&str, &str)]) -> tempfile::TempDir {
		let dir = tempfile::TempDir::new().unwrap();
		for (name, body) in scripts {
			let path = dir.path().join(name);
			std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
			std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
		}
		dir
	}

	/// Runs the Slurm client against shell shims through `ssh_program`, which
	/// receives `<options> host <quoted command>` and evaluates the last one
	/// with the shim directory first on PATH.
	fn scheduler_with(dir: &tempfile::TempDir) -> SlurmScheduler {
		let ssh = dir.path().join("fake-ssh");
		std::fs::write(
			&ssh,
			format!("#!/bin/sh\nfor last; do :; done\nPATH=\"{}:$PATH\" exec sh -c \"$last\"\n", dir.path().display()),
		)
		.unwrap();
		std::fs::set_permissions(&ssh, std::fs::Permissions::from_mode(0o755)).unwrap();
		SlurmScheduler::new(&ClusterSettings {
			login_host: Some("login".into()),
			ssh_program: ssh.display().to_string(),
			..ClusterSettings::default()
		})
	}

	#[tokio::test]
	async fn falls_back_to_accounting_for_finished_jobs() {
		let dir = shim_dir(&[
			("squeue", "echo 'slurm_load_jobs error: Invalid job id specified' >&2; exit 1"),
			("sacct", "echo 'CANCELLED by 1000|gpu03'"),
		]);
		let status = scheduler_with(&dir).query_state(&AllocationId::new("77")).await.unwrap();
		assert_eq!(status.state, AllocationState::Cancelled);
		assert_eq!(status.node.as_deref(), Some("gpu03"));
	}

	#[tokio::test]
	async fn submission_rejection_keeps_scheduler_text() {
		let dir = shim_dir(&[("sbatch", "cat >/dev/null; echo 'sbatch: error: invalid partition specified: nope' >&2; exit 1")]);
		let err = scheduler_with(&dir).submit(&spec()).await.unwrap_err();
		match err {
			TunnelError::Scheduler(SchedulerError::SubmissionRejected(message)) => assert!(message.contains("invalid partition")),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn name_lookup_skips_terminal_rows() {
		let dir = shim_dir(&[("squeue", "printf '101|RUNNING\\n102|COMPLETING\\n103|CANCELLED\\n'")]);
		let ids = scheduler_with(&dir).query_by_name("tunnel-job", "alice").await.unwrap();
		assert_eq!(ids, vec![AllocationId::new("101"), AllocationId::new("102")]);
	}

	#[tokio::test]
	async fn cancelling_a_finished_job_succeeds() {
		let dir = shim_dir(&[("scancel", "echo 'scancel: error: Kill job error on job id 5: Job/step already completing or completed' >&2; exit 1")]);
		scheduler_with(&dir).cancel(&AllocationId::new("5")).await.unwrap();
	}
}
