//! Builds the scheduler job that runs the job body for a session.

use tunnel_protocol::{JobSpec, Session};

use crate::config::{ClusterSettings, LifecycleConfig};

/// Signal the scheduler sends `signal_margin` before the time limit.
pub const PREEMPTION_SIGNAL: &str = "USR1";

/// Job running `tunnel job` for `session` inside a fresh allocation.
pub fn job_spec(session: &Session, cluster: &ClusterSettings, lifecycle: &LifecycleConfig) -> JobSpec {
	JobSpec::new(&session.name, session.resources.clone(), &session.log_path)
		.with_preemption(PREEMPTION_SIGNAL, lifecycle.signal_margin())
		.args(cluster.remote_invocation())
		.args([
			"-v".to_string(),
			"job".to_string(),
			"--session".to_string(),
			session.name.clone(),
			"--owner".to_string(),
			session.owner.clone(),
			"--port".to_string(),
			session.port.to_string(),
			"--host-key".to_string(),
			session.host_key.display().to_string(),
			"--log-path".to_string(),
			session.log_path.clone(),
			"--grace-secs".to_string(),
			lifecycle.shutdown_grace_secs.to_string(),
		])
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;
	use std::time::Duration;

	use tunnel_protocol::ResourceSpec;

	use super::*;

	#[test]
	fn job_command_carries_session_parameters() {
		let session = Session {
			name: "tunnel-job".into(),
			owner: "alice".into(),
			resources: ResourceSpec {
				partition: Some("gpu".into()),
				account: None,
				cpus: 4,
				memory: "16G".into(),
				time_limit: "8:00:00".parse().unwrap(),
				gpus: None,
			},
			port: 50022,
			host_key: PathBuf::from("/home/alice/.ssh/tunnel host key"),
			log_path: "%x-%j.log".into(),
			host_alias: None,
		};
		let cluster = ClusterSettings {
			remote_binary: "/opt/tunnel/bin/tunnel".into(),
			..ClusterSettings::default()
		};

		let spec = job_spec(&session, &cluster, &LifecycleConfig::default());
		assert_eq!(spec.name, "tunnel-job");
		assert_eq!(spec.preemption.as_ref().map(|p| p.margin), Some(Duration::from_secs(120)));
		assert_eq!(&spec.command[..3], &["/opt/tunnel/bin/tunnel", "-v", "job"]);
		let key = spec.command.iter().position(|arg| arg == "--host-key").unwrap();
		assert_eq!(spec.command[key + 1], "/home/alice/.ssh/tunnel host key");
		let port = spec.command.iter().position(|arg| arg == "--port").unwrap();
		assert_eq!(spec.command[port + 1], "50022");
	}
}
