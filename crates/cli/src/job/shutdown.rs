//! Signals that end a running job body.

use std::fmt;

use serde::Serialize;
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Why a job body is shutting down. Every variant runs the same cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
	/// The scheduler's warning ahead of the time limit (SIGUSR1).
	PreemptionImminent,
	/// Operator or scheduler cancellation (SIGTERM).
	Terminated,
	/// Interactive interrupt (SIGINT).
	Interrupted,
}

impl fmt::Display for ShutdownReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::PreemptionImminent => f.write_str("preemption imminent"),
			Self::Terminated => f.write_str("terminated"),
			Self::Interrupted => f.write_str("interrupted"),
		}
	}
}

/// Registered shutdown signal streams.
///
/// Registration happens before any other work so a signal arriving while the
/// endpoint is still starting is not lost.
pub struct ShutdownSignals {
	preempt: Signal,
	terminate: Signal,
	interrupt: Signal,
}

impl ShutdownSignals {
	pub fn install() -> std::io::Result<Self> {
		Ok(Self {
			preempt: signal(SignalKind::user_defined1())?,
			terminate: signal(SignalKind::terminate())?,
			interrupt: signal(SignalKind::interrupt())?,
		})
	}

	/// Waits for the next shutdown signal.
	pub async fn recv(&mut self) -> ShutdownReason {
		tokio::select! {
			Some(()) = self.preempt.recv() => ShutdownReason::PreemptionImminent,
			Some(()) = self.terminate.recv() => ShutdownReason::Terminated,
			Some(()) = self.interrupt.recv() => ShutdownReason::Interrupted,
			else => ShutdownReason::Terminated,
		}
	}
}
