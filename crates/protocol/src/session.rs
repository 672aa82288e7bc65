//! Session identity and resource requests.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical identity of a desired endpoint, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
	/// Unique key; also used as the scheduler job name.
	pub name: String,
	/// User that owns the allocation and every process it spawns.
	pub owner: String,
	pub resources: ResourceSpec,
	/// Port the endpoint binds on the compute node.
	pub port: u16,
	/// Host identity material the endpoint presents (path on the compute node).
	pub host_key: PathBuf,
	/// Scheduler log path template; `%x` and `%j` are filled in by the scheduler.
	pub log_path: String,
	/// Alias handed to collaborators that template client-side connection config.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub host_alias: Option<String>,
}

/// Resources requested for one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub partition: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account: Option<String>,
	pub cpus: u32,
	/// Memory in scheduler notation, e.g. `16G`.
	pub memory: String,
	pub time_limit: TimeLimit,
	/// Generic resource request, e.g. `gpu:1`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gpus: Option<String>,
}

/// Wall-clock limit of an allocation.
///
/// Parses the scheduler's notations: `M`, `M:S`, `H:M:S`, `D-H`, `D-H:M`
/// and `D-H:M:S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeLimit(Duration);

/// Error for malformed time-limit strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time limit {input:?}: {reason}")]
pub struct TimeLimitError {
	pub input: String,
	pub reason: &'static str,
}

impl TimeLimit {
	pub fn as_duration(&self) -> Duration {
		self.0
	}

	/// Renders as `D-HH:MM:SS`, dropping the day part when zero.
	pub fn to_scheduler_format(&self) -> String {
		let total = self.0.as_secs();
		let days = total / 86_400;
		let hours = (total % 86_400) / 3_600;
		let minutes = (total % 3_600) / 60;
		let seconds = total % 60;
		if days > 0 {
			format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
		} else {
			format!("{hours:02}:{minutes:02}:{seconds:02}")
		}
	}
}

impl FromStr for TimeLimit {
	type Err = TimeLimitError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let input = s.trim();
		let fail = |reason| TimeLimitError {
			input: s.to_string(),
			reason,
		};
		if input.is_empty() {
			return Err(fail("empty"));
		}

		let parse = |part: &str| part.parse::<u64>().map_err(|_| fail("non-numeric component"));

		let (days, clock) = match input.split_once('-') {
			Some((days, clock)) => (Some(parse(days)?), clock),
			None => (None, input),
		};

		let parts = clock.split(':').map(parse).collect::<Result<Vec<_>, _>>()?;
		let (days, hours, minutes, seconds) = match (days, parts.as_slice()) {
			(None, [minutes]) => (0, 0, *minutes, 0),
			(None, [minutes, seconds]) => (0, 0, *minutes, *seconds),
			(None, [hours, minutes, seconds]) => (0, *hours, *minutes, *seconds),
			(Some(days), [hours]) => (days, *hours, 0, 0),
			(Some(days), [hours, minutes]) => (days, *hours, *minutes, 0),
			(Some(days), [hours, minutes, seconds]) => (days, *hours, *minutes, *seconds),
			_ => return Err(fail("too many components")),
		};
		let secs = days
			.checked_mul(86_400)
			.and_then(|total| hours.checked_mul(3_600).and_then(|h| total.checked_add(h)))
			.and_then(|total| minutes.checked_mul(60).and_then(|m| total.checked_add(m)))
			.and_then(|total| total.checked_add(seconds))
			.ok_or_else(|| fail("out of range"))?;

		if secs == 0 {
			return Err(fail("must be positive"));
		}
		Ok(Self(Duration::from_secs(secs)))
	}
}

impl TryFrom<String> for TimeLimit {
	type Error = TimeLimitError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<TimeLimit> for String {
	fn from(value: TimeLimit) -> Self {
		value.to_scheduler_format()
	}
}

impl fmt::Display for TimeLimit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_scheduler_format())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_scheduler_notations() {
		let secs = |s: &str| s.parse::<TimeLimit>().unwrap().as_duration().as_secs();
		assert_eq!(secs("90"), 90 * 60);
		assert_eq!(secs("10:30"), 10 * 60 + 30);
		assert_eq!(secs("8:00:00"), 8 * 3_600);
		assert_eq!(secs("2-12"), 2 * 86_400 + 12 * 3_600);
		assert_eq!(secs("1-00:30"), 86_400 + 30 * 60);
		assert_eq!(secs("1-02:03:04"), 86_400 + 2 * 3_600 + 3 * 60 + 4);
	}

	#[test]
	fn rejects_malformed_limits() {
		assert!("".parse::<TimeLimit>().is_err());
		assert!("abc".parse::<TimeLimit>().is_err());
		assert!("1:2:3:4".parse::<TimeLimit>().is_err());
		assert!("0".parse::<TimeLimit>().is_err());
		assert!("1-1:1:1:1".parse::<TimeLimit>().is_err());
	}

	#[test]
	fn oversized_limits_are_rejected_not_wrapped() {
		let err = "999999999999999-0".parse::<TimeLimit>().unwrap_err();
		assert_eq!(err.reason, "out of range");
		assert!("18446744073709551615:0".parse::<TimeLimit>().is_err());
	}

	#[test]
	fn renders_with_and_without_days() {
		assert_eq!("8:00:00".parse::<TimeLimit>().unwrap().to_string(), "08:00:00");
		assert_eq!("1-02:03:04".parse::<TimeLimit>().unwrap().to_string(), "1-02:03:04");
	}

	#[test]
	fn deserializes_from_string() {
		let spec: ResourceSpec = serde_json::from_str(r#"{"cpus": 4, "memory": "16G", "timeLimit": "4:00:00"}"#).unwrap();
		assert_eq!(spec.time_limit.as_duration(), Duration::from_secs(4 * 3_600));
		assert!(spec.partition.is_none());

		let err = serde_json::from_str::<ResourceSpec>(r#"{"cpus": 4, "memory": "16G", "timeLimit": "soon"}"#);
		assert!(err.is_err());
	}
}
