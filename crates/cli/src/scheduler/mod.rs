//! Scheduler client abstraction.
//!
//! The scheduler is the only source of truth for which allocation currently
//! holds a session name; nothing here caches allocation identity.

mod fake;
mod slurm;

use async_trait::async_trait;
use tunnel_protocol::{AllocationId, AllocationStatus, JobSpec};

use crate::error::Result;

pub use fake::{FakeScheduler, ScriptedAllocation};
pub use slurm::{SlurmScheduler, first_node, parse_state};

/// Submit, query and cancel allocations.
#[async_trait]
pub trait Scheduler: Send + Sync {
	/// Submits a job; rejection is [`SchedulerError::SubmissionRejected`](crate::error::SchedulerError).
	async fn submit(&self, spec: &JobSpec) -> Result<AllocationId>;

	async fn query_state(&self, id: &AllocationId) -> Result<AllocationStatus>;

	/// Non-terminal allocations named `name` belonging to `owner`.
	async fn query_by_name(&self, name: &str, owner: &str) -> Result<Vec<AllocationId>>;

	/// Cancelling an allocation that already finished succeeds.
	async fn cancel(&self, id: &AllocationId) -> Result<()>;
}
