//! Error taxonomy for session lifecycle operations.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tunnel_protocol::{AllocationId, AllocationState};

use crate::output::ErrorCode;

/// Scheduler-side failures, carrying the scheduler's own diagnostic text.
#[derive(Debug, Error)]
pub enum SchedulerError {
	#[error("submission rejected: {0}")]
	SubmissionRejected(String),
	#[error("query failed: {0}")]
	QueryFailed(String),
	#[error("cancel of {id} failed: {message}")]
	CancelFailed { id: AllocationId, message: String },
	#[error("unparseable scheduler output: {0}")]
	Unparseable(String),
}

#[derive(Debug, Error)]
pub enum TunnelError {
	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("cannot reach {host}: {message}")]
	Connectivity { host: String, message: String },

	#[error("scheduler error: {0}")]
	Scheduler(#[from] SchedulerError),

	#[error("allocation {id} reached {state} before becoming reachable; see {}", .log_path.display())]
	AllocationTerminated {
		id: AllocationId,
		state: AllocationState,
		node: Option<String>,
		log_path: PathBuf,
	},

	#[error("allocation {id} still {state} after {waited:?}; see {}", .log_path.display())]
	TimeoutExceeded {
		id: AllocationId,
		state: AllocationState,
		waited: Duration,
		log_path: PathBuf,
	},

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl TunnelError {
	pub fn config(message: impl Into<String>) -> Self {
		Self::Configuration(message.into())
	}

	pub fn connectivity(host: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Connectivity {
			host: host.into(),
			message: message.into(),
		}
	}

	/// Stable code used in the output envelope.
	pub fn code(&self) -> ErrorCode {
		match self {
			Self::Configuration(_) => ErrorCode::ConfigurationError,
			Self::Connectivity { .. } => ErrorCode::ConnectivityError,
			Self::Scheduler(_) => ErrorCode::SchedulerError,
			Self::AllocationTerminated { .. } => ErrorCode::AllocationTerminated,
			Self::TimeoutExceeded { .. } => ErrorCode::TimeoutExceeded,
			Self::Io(_) => ErrorCode::IoError,
			Self::Json(_) | Self::Anyhow(_) => ErrorCode::InternalError,
		}
	}

	/// Process exit status; lets scripts tell "still pending" from "already dead".
	pub fn exit_code(&self) -> i32 {
		match self {
			Self::Configuration(_) => 2,
			Self::Connectivity { .. } => 3,
			Self::Scheduler(_) => 4,
			Self::AllocationTerminated { .. } => 5,
			Self::TimeoutExceeded { .. } => 6,
			Self::Io(_) | Self::Json(_) | Self::Anyhow(_) => 1,
		}
	}

	/// Structured context for diagnosis without re-querying the scheduler.
	pub fn details(&self) -> Option<Value> {
		match self {
			Self::Connectivity { host, .. } => Some(json!({ "host": host })),
			Self::AllocationTerminated { id, state, node, log_path } => Some(json!({
				"allocation": id,
				"state": state.to_string(),
				"node": node,
				"logPath": log_path,
			})),
			Self::TimeoutExceeded { id, state, waited, log_path } => Some(json!({
				"allocation": id,
				"state": state.to_string(),
				"waitedSecs": waited.as_secs(),
				"logPath": log_path,
			})),
			_ => None,
		}
	}
}

pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn terminated_and_timeout_are_distinguishable() {
		let terminated = TunnelError::AllocationTerminated {
			id: AllocationId::new("7"),
			state: AllocationState::Failed,
			node: Some("gpu03".into()),
			log_path: PathBuf::from("tunnel-job-7.log"),
		};
		let timeout = TunnelError::TimeoutExceeded {
			id: AllocationId::new("7"),
			state: AllocationState::Pending,
			waited: Duration::from_secs(300),
			log_path: PathBuf::from("tunnel-job-7.log"),
		};

		assert_ne!(terminated.exit_code(), timeout.exit_code());
		assert_eq!(terminated.code(), ErrorCode::AllocationTerminated);
		assert_eq!(timeout.code(), ErrorCode::TimeoutExceeded);
		assert_eq!(terminated.details().unwrap()["node"], "gpu03");
		assert_eq!(timeout.details().unwrap()["state"], "PENDING");
		assert!(terminated.to_string().contains("tunnel-job-7.log"));
	}

	#[test]
	fn scheduler_errors_keep_diagnostic_text() {
		let err: TunnelError = SchedulerError::SubmissionRejected("Invalid partition name specified".into()).into();
		assert_eq!(err.exit_code(), 4);
		assert!(err.to_string().contains("Invalid partition name specified"));
	}
}
