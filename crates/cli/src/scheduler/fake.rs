//! In-memory scheduler for lifecycle tests.
//!
//! Each submission consumes the next [`ScriptedAllocation`], which decides how
//! many polls the allocation stays pending and where it ends up. Every call
//! is recorded so tests can assert on what the manager asked for.
//!
//! ```ignore
//! let scheduler = FakeScheduler::new();
//! scheduler.script(ScriptedAllocation::running_on("gpu03").after_polls(2));
//! let manager = SessionManager::new(Arc::new(scheduler.clone()), sweeper, settings);
//! let endpoint = manager.establish(&session).await?;
//! assert_eq!(scheduler.submissions().len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tunnel_protocol::{AllocationId, AllocationState, AllocationStatus, JobSpec};

use super::Scheduler;
use crate::error::{Result, SchedulerError};

/// How one submitted allocation evolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedAllocation {
	/// Polls answered with PENDING before settling; `None` stays pending forever.
	pub pending_polls: Option<u32>,
	pub settles_in: AllocationState,
	pub node: Option<String>,
}

impl ScriptedAllocation {
	pub fn running_on(node: impl Into<String>) -> Self {
		Self {
			pending_polls: Some(0),
			settles_in: AllocationState::Running,
			node: Some(node.into()),
		}
	}

	/// Ends in `state` without ever running.
	pub fn ending_in(state: AllocationState) -> Self {
		Self {
			pending_polls: Some(0),
			settles_in: state,
			node: None,
		}
	}

	pub fn never_starts() -> Self {
		Self {
			pending_polls: None,
			settles_in: AllocationState::Pending,
			node: None,
		}
	}

	pub fn after_polls(mut self, polls: u32) -> Self {
		self.pending_polls = Some(polls);
		self
	}
}

impl Default for ScriptedAllocation {
	fn default() -> Self {
		Self::running_on("node01")
	}
}

#[derive(Debug)]
struct FakeAllocation {
	id: AllocationId,
	name: String,
	state: AllocationState,
	node: Option<String>,
	script: ScriptedAllocation,
	/// Polls left before a cancelled allocation leaves COMPLETING.
	retiring: Option<u32>,
}

impl FakeAllocation {
	fn status(&self) -> AllocationStatus {
		AllocationStatus {
			id: self.id.clone(),
			state: self.state.clone(),
			node: self.node.clone(),
		}
	}

	fn advance(&mut self) {
		if let Some(left) = self.retiring {
			if left == 0 {
				self.state = AllocationState::Cancelled;
				self.retiring = None;
			} else {
				self.retiring = Some(left - 1);
			}
			return;
		}
		if self.state != AllocationState::Pending {
			return;
		}
		match self.script.pending_polls {
			None => {}
			Some(0) => {
				self.state = self.script.settles_in.clone();
				self.node = self.script.node.clone();
			}
			Some(left) => self.script.pending_polls = Some(left - 1),
		}
	}
}

#[derive(Debug, Default)]
struct FakeState {
	next_id: u32,
	allocations: Vec<FakeAllocation>,
	scripts: VecDeque<ScriptedAllocation>,
	reject_next: Option<String>,
	cancel_lag: u32,
	submissions: Vec<JobSpec>,
	cancellations: Vec<AllocationId>,
	state_queries: usize,
}

impl FakeState {
	fn allocate_id(&mut self) -> AllocationId {
		self.next_id += 1;
		AllocationId::new(format!("A{}", self.next_id))
	}
}

/// Scripted in-memory [`Scheduler`]; clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeScheduler {
	state: Arc<Mutex<FakeState>>,
}

impl FakeScheduler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues the behavior of the next submission.
	pub fn script(&self, script: ScriptedAllocation) -> &Self {
		self.state.lock().scripts.push_back(script);
		self
	}

	/// Rejects the next submission with `message`.
	pub fn reject_next(&self, message: impl Into<String>) {
		self.state.lock().reject_next = Some(message.into());
	}

	/// Cancelled allocations report COMPLETING for `polls` queries first.
	pub fn set_cancel_lag(&self, polls: u32) {
		self.state.lock().cancel_lag = polls;
	}

	/// Seeds an allocation that exists independently of any submission.
	pub fn insert(&self, name: &str, state: AllocationState, node: Option<&str>) -> AllocationId {
		let mut inner = self.state.lock();
		let id = inner.allocate_id();
		inner.allocations.push(FakeAllocation {
			id: id.clone(),
			name: name.to_string(),
			state,
			node: node.map(str::to_string),
			script: ScriptedAllocation::never_starts(),
			retiring: None,
		});
		id
	}

	/// Forces an allocation into `state`, as an operator or the scheduler would.
	pub fn set_state(&self, id: &AllocationId, state: AllocationState) {
		if let Some(allocation) = self.state.lock().allocations.iter_mut().find(|a| &a.id == id) {
			allocation.state = state;
			allocation.retiring = None;
		}
	}

	pub fn submissions(&self) -> Vec<JobSpec> {
		self.state.lock().submissions.clone()
	}

	pub fn cancellations(&self) -> Vec<AllocationId> {
		self.state.lock().cancellations.clone()
	}

	pub fn state_queries(&self) -> usize {
		self.state.lock().state_queries
	}

	/// Current status without advancing the script.
	pub fn peek(&self, id: &AllocationId) -> Option<AllocationStatus> {
		self.state.lock().allocations.iter().find(|a| &a.id == id).map(FakeAllocation::status)
	}

	/// Non-terminal allocations named `name`, without advancing anything.
	pub fn live(&self, name: &str) -> Vec<AllocationStatus> {
		self.state
			.lock()
			.allocations
			.iter()
			.filter(|a| a.name == name && !a.state.is_terminal())
			.map(FakeAllocation::status)
			.collect()
	}
}

#[async_trait]
impl Scheduler for FakeScheduler {
	async fn submit(&self, spec: &JobSpec) -> Result<AllocationId> {
		let mut inner = self.state.lock();
		if let Some(message) = inner.reject_next.take() {
			return Err(SchedulerError::SubmissionRejected(message).into());
		}
		inner.submissions.push(spec.clone());
		let script = inner.scripts.pop_front().unwrap_or_default();
		let id = inner.allocate_id();
		inner.allocations.push(FakeAllocation {
			id: id.clone(),
			name: spec.name.clone(),
			state: AllocationState::Pending,
			node: None,
			script,
			retiring: None,
		});
		Ok(id)
	}

	async fn query_state(&self, id: &AllocationId) -> Result<AllocationStatus> {
		let mut inner = self.state.lock();
		inner.state_queries += 1;
		match inner.allocations.iter_mut().find(|a| &a.id == id) {
			Some(allocation) => {
				allocation.advance();
				Ok(allocation.status())
			}
			None => Err(SchedulerError::QueryFailed(format!("Invalid job id specified: {id}")).into()),
		}
	}

	async fn query_by_name(&self, name: &str, _owner: &str) -> Result<Vec<AllocationId>> {
		Ok(self.live(name).into_iter().map(|status| status.id).collect())
	}

	async fn cancel(&self, id: &AllocationId) -> Result<()> {
		let mut inner = self.state.lock();
		inner.cancellations.push(id.clone());
		let lag = inner.cancel_lag;
		if let Some(allocation) = inner.allocations.iter_mut().find(|a| &a.id == id) {
			if !allocation.state.is_terminal() {
				if lag == 0 {
					allocation.state = AllocationState::Cancelled;
				} else {
					allocation.state = AllocationState::Completing;
					allocation.retiring = Some(lag);
				}
			}
		}
		Ok(())
	}
}
