//! Structured job specification submitted to the scheduler.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::ResourceSpec;

/// Signal the scheduler delivers to the job body ahead of the hard time limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreemptionNotice {
	/// Signal name without the `SIG` prefix, e.g. `USR1`.
	pub signal: String,
	/// How long before the time limit the signal is sent.
	#[serde(with = "duration_secs")]
	pub margin: Duration,
}

/// Everything the scheduler needs to run one job body.
///
/// The command is kept as an argv vector; turning it into a script is the
/// scheduler client's job and must quote every element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
	pub name: String,
	pub resources: ResourceSpec,
	/// Output path template passed to the scheduler verbatim.
	pub log_path: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub preemption: Option<PreemptionNotice>,
	pub command: Vec<String>,
}

impl JobSpec {
	pub fn new(name: impl Into<String>, resources: ResourceSpec, log_path: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			resources,
			log_path: log_path.into(),
			preemption: None,
			command: Vec::new(),
		}
	}

	/// Requests a warning signal `margin` before the time limit.
	pub fn with_preemption(mut self, signal: impl Into<String>, margin: Duration) -> Self {
		self.preemption = Some(PreemptionNotice {
			signal: signal.into(),
			margin,
		});
		self
	}

	/// Appends one argument to the command line.
	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.command.push(arg.into());
		self
	}

	/// Appends several arguments to the command line.
	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.command.extend(args.into_iter().map(Into::into));
		self
	}
}

mod duration_secs {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(value.as_secs())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_secs)
	}
}
