//! Allocations as reported by the scheduler, and the endpoints they expose.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheduler-assigned identifier of one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(String);

impl AllocationId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for AllocationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for AllocationId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// Lifecycle state of an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationState {
	Pending,
	Running,
	/// Winding down after the job body exited; not yet terminal.
	Completing,
	Completed,
	Failed,
	Cancelled,
	/// A state this client does not recognize, kept verbatim for diagnostics.
	Unknown(String),
}

impl AllocationState {
	/// Returns `true` once the allocation can never become reachable again.
	///
	/// Unrecognized states count as terminal so pollers fail fast instead of
	/// waiting out their whole budget on something they cannot interpret.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Unknown(_))
	}
}

impl fmt::Display for AllocationState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Pending => f.write_str("PENDING"),
			Self::Running => f.write_str("RUNNING"),
			Self::Completing => f.write_str("COMPLETING"),
			Self::Completed => f.write_str("COMPLETED"),
			Self::Failed => f.write_str("FAILED"),
			Self::Cancelled => f.write_str("CANCELLED"),
			Self::Unknown(raw) => write!(f, "UNKNOWN({raw})"),
		}
	}
}

/// One observation of an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationStatus {
	pub id: AllocationId,
	pub state: AllocationState,
	/// Assigned node; present only once the scheduler has placed the allocation.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub node: Option<String>,
}

/// Reachable (node, port) pair of a running allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
	pub allocation: AllocationId,
	pub node: String,
	pub port: u16,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub host_alias: Option<String>,
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.node, self.port)
	}
}
