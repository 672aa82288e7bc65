//! Session orchestration against the scheduler.
//!
//! At most one non-terminal allocation should hold a session name. That is
//! enforced procedurally: every [`SessionManager::establish`] first preempts
//! whatever currently holds the name. Two concurrent invocations for the same
//! name can still race; the scheduler remains the source of truth and nothing
//! is cached locally.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use tunnel_protocol::{AllocationId, AllocationState, AllocationStatus, Endpoint, Session};

use crate::config::{ClusterSettings, LifecycleConfig};
use crate::error::{Result, TunnelError};
use crate::job::{LogPathVars, job_spec, realize_log_path};
use crate::scheduler::Scheduler;
use crate::sweep::NodeSweeper;

/// Drives the establish/stop/status operations for sessions.
pub struct SessionManager {
	scheduler: Arc<dyn Scheduler>,
	sweeper: Arc<dyn NodeSweeper>,
	cluster: ClusterSettings,
	lifecycle: LifecycleConfig,
}

impl SessionManager {
	pub fn new(scheduler: Arc<dyn Scheduler>, sweeper: Arc<dyn NodeSweeper>, cluster: ClusterSettings, lifecycle: LifecycleConfig) -> Self {
		Self {
			scheduler,
			sweeper,
			cluster,
			lifecycle,
		}
	}

	/// Replaces any allocation holding `session.name` with a fresh one and
	/// waits until it is reachable, up to the configured startup timeout.
	pub async fn establish(&self, session: &Session) -> Result<Endpoint> {
		self.establish_within(session, self.lifecycle.startup_timeout()).await
	}

	pub async fn establish_within(&self, session: &Session, timeout: Duration) -> Result<Endpoint> {
		let replaced = self.preempt(session).await?;
		if !replaced.is_empty() {
			info!(target: "tunnel.session", session = %session.name, replaced = replaced.len(), "previous allocations cancelled");
		}

		let spec = job_spec(session, &self.cluster, &self.lifecycle);
		let id = self.scheduler.submit(&spec).await?;
		info!(target: "tunnel.session", session = %session.name, allocation = %id, "allocation submitted");

		let endpoint = self.poll_until_running(&id, session, timeout).await?;
		info!(target: "tunnel.session", session = %session.name, allocation = %id, endpoint = %endpoint, "endpoint reachable");
		Ok(endpoint)
	}

	/// Cancels every allocation holding `session.name` without resubmitting.
	pub async fn stop(&self, session: &Session) -> Result<Vec<AllocationId>> {
		self.preempt(session).await
	}

	/// Non-terminal allocations for the session, as the scheduler sees them.
	pub async fn status(&self, session: &Session) -> Result<Vec<AllocationStatus>> {
		let ids = self.scheduler.query_by_name(&session.name, &session.owner).await?;
		let mut statuses = Vec::with_capacity(ids.len());
		for id in ids {
			statuses.push(self.scheduler.query_state(&id).await?);
		}
		Ok(statuses)
	}

	/// Sweeps and cancels every live allocation named `session.name`, then
	/// waits (bounded) for them to retire.
	pub async fn preempt(&self, session: &Session) -> Result<Vec<AllocationId>> {
		let ids = self.scheduler.query_by_name(&session.name, &session.owner).await?;
		if ids.is_empty() {
			debug!(target: "tunnel.session", session = %session.name, "no previous allocation");
			return Ok(ids);
		}

		for id in &ids {
			match self.scheduler.query_state(id).await {
				Ok(AllocationStatus { node: Some(node), .. }) => {
					info!(target: "tunnel.session", allocation = %id, node = %node, "sweeping node before cancel");
					self.sweeper.cleanup(&node, &session.owner).await;
				}
				Ok(status) => debug!(target: "tunnel.session", allocation = %id, state = %status.state, "no node assigned; skipping sweep"),
				Err(err) => warn!(target: "tunnel.session", allocation = %id, error = %err, "could not resolve node; skipping sweep"),
			}
			self.scheduler.cancel(id).await?;
			info!(target: "tunnel.session", allocation = %id, "cancel requested");
		}

		self.await_retirement(&ids).await;
		Ok(ids)
	}

	/// Polls cancelled allocations until they are terminal or gone, giving up
	/// with a warning after the settle timeout. Overlap past that point is
	/// tolerated.
	async fn await_retirement(&self, ids: &[AllocationId]) {
		let deadline = Instant::now() + self.lifecycle.cancel_settle();
		let mut pending: Vec<AllocationId> = ids.to_vec();

		loop {
			let mut still_live = Vec::new();
			for id in pending {
				match self.scheduler.query_state(&id).await {
					Ok(status) if !status.state.is_terminal() => still_live.push(id),
					Ok(_) => {}
					Err(err) => debug!(target: "tunnel.session", allocation = %id, error = %err, "treating unqueryable allocation as retired"),
				}
			}
			if still_live.is_empty() {
				return;
			}

			let now = Instant::now();
			if now >= deadline {
				let ids = still_live.iter().map(AllocationId::as_str).collect::<Vec<_>>().join(", ");
				warn!(target: "tunnel.session", allocations = %ids, "cancelled allocations still winding down; continuing");
				return;
			}
			tokio::time::sleep(self.lifecycle.poll_interval().min(deadline - now)).await;
			pending = still_live;
		}
	}

	/// Polls `id` at a fixed interval until it runs on a node, ends, or
	/// `timeout` elapses.
	pub async fn poll_until_running(&self, id: &AllocationId, session: &Session, timeout: Duration) -> Result<Endpoint> {
		let started = Instant::now();
		loop {
			let status = self.scheduler.query_state(id).await?;
			debug!(target: "tunnel.session", allocation = %id, state = %status.state, node = ?status.node, "polled");

			if status.state == AllocationState::Running {
				if let Some(node) = status.node {
					return Ok(Endpoint {
						allocation: id.clone(),
						node,
						port: session.port,
						host_alias: session.host_alias.clone(),
					});
				}
			} else if status.state.is_terminal() {
				return Err(TunnelError::AllocationTerminated {
					log_path: log_path_for(session, id, status.node.as_deref()),
					id: id.clone(),
					state: status.state,
					node: status.node,
				});
			}

			let waited = started.elapsed();
			if waited >= timeout {
				return Err(TunnelError::TimeoutExceeded {
					log_path: log_path_for(session, id, status.node.as_deref()),
					id: id.clone(),
					state: status.state,
					waited,
				});
			}
			tokio::time::sleep(self.lifecycle.poll_interval().min(timeout - waited)).await;
		}
	}
}

fn log_path_for(session: &Session, id: &AllocationId, node: Option<&str>) -> PathBuf {
	realize_log_path(
		&session.log_path,
		&LogPathVars {
			job_id: Some(id.as_str()),
			job_name: Some(&session.name),
			user: Some(&session.owner),
			node,
		},
	)
}

#[cfg(test)]
mod tests {
	use tunnel_protocol::ResourceSpec;

	use super::*;
	use crate::scheduler::{FakeScheduler, ScriptedAllocation};
	use crate::sweep::RecordingSweeper;

	fn session() -> Session {
		Session {
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
			host_key: PathBuf::from("/home/alice/.ssh/tunnel_host_key"),
			log_path: "%x-%j.log".into(),
			host_alias: Some("tunnel".into()),
		}
	}

	fn manager(scheduler: &FakeScheduler, sweeper: &RecordingSweeper) -> SessionManager {
		SessionManager::new(
			Arc::new(scheduler.clone()),
			Arc::new(sweeper.clone()),
			ClusterSettings::default(),
			LifecycleConfig {
				poll_interval_ms: 5,
				startup_timeout_secs: 5,
				cancel_settle_secs: 1,
				..LifecycleConfig::default()
			},
		)
	}

	#[tokio::test]
	async fn running_without_node_keeps_polling() {
		let scheduler = FakeScheduler::new();
		let sweeper = RecordingSweeper::new();
		let id = scheduler.insert("tunnel-job", AllocationState::Running, None);
		let manager = manager(&scheduler, &sweeper);

		let err = manager.poll_until_running(&id, &session(), Duration::from_millis(40)).await.unwrap_err();
		assert!(matches!(err, TunnelError::TimeoutExceeded { state: AllocationState::Running, .. }), "{err:?}");
		assert!(scheduler.state_queries() > 1);
	}

	#[tokio::test]
	async fn terminal_state_is_not_a_timeout() {
		let scheduler = FakeScheduler::new();
		let sweeper = RecordingSweeper::new();
		scheduler.script(ScriptedAllocation::ending_in(AllocationState::Failed).after_polls(2));
		let err = manager(&scheduler, &sweeper).establish(&session()).await.unwrap_err();
		match err {
			TunnelError::AllocationTerminated { id, state, log_path, .. } => {
				assert_eq!(id, AllocationId::new("A1"));
				assert_eq!(state, AllocationState::Failed);
				assert_eq!(log_path, PathBuf::from("tunnel-job-A1.log"));
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn pending_past_deadline_times_out() {
		let scheduler = FakeScheduler::new();
		let sweeper = RecordingSweeper::new();
		scheduler.script(ScriptedAllocation::never_starts());
		let manager = manager(&scheduler, &sweeper);
		let err = manager.establish_within(&session(), Duration::from_millis(30)).await.unwrap_err();
		match err {
			TunnelError::TimeoutExceeded { state, waited, .. } => {
				assert_eq!(state, AllocationState::Pending);
				assert!(waited >= Duration::from_millis(30));
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn unscheduled_allocation_is_cancelled_without_sweep() {
		let scheduler = FakeScheduler::new();
		let sweeper = RecordingSweeper::new();
		let old = scheduler.insert("tunnel-job", AllocationState::Pending, None);

		let cancelled = manager(&scheduler, &sweeper).stop(&session()).await.unwrap();
		assert_eq!(cancelled, vec![old.clone()]);
		assert!(sweeper.calls().is_empty());
		assert_eq!(scheduler.peek(&old).unwrap().state, AllocationState::Cancelled);
	}

	#[tokio::test]
	async fn retirement_wait_is_bounded() {
		let scheduler = FakeScheduler::new();
		let sweeper = RecordingSweeper::new();
		scheduler.set_cancel_lag(u32::MAX);
		scheduler.insert("tunnel-job", AllocationState::Running, Some("gpu03"));
		let manager = manager(&scheduler, &sweeper);

		let started = std::time::Instant::now();
		let endpoint = manager.establish(&session()).await.unwrap();
		assert!(started.elapsed() < Duration::from_secs(3));
		assert_eq!(endpoint.node, "node01");
		assert_eq!(sweeper.calls(), vec![("gpu03".to_string(), "alice".to_string())]);
	}

	#[tokio::test]
	async fn other_sessions_are_left_alone() {
		let scheduler = FakeScheduler::new();
		let sweeper = RecordingSweeper::new();
		let other = scheduler.insert("notebook", AllocationState::Running, Some("gpu09"));

		manager(&scheduler, &sweeper).establish(&session()).await.unwrap();
		assert!(scheduler.cancellations().is_empty());
		assert_eq!(scheduler.peek(&other).unwrap().state, AllocationState::Running);
	}
}
