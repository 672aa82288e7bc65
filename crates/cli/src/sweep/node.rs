//! Sweeping the node of an allocation that is about to be cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::ClusterSettings;
use crate::shell::{RemoteShell, Target};

/// Runs the sweep for `owner` on a compute node. Never fails.
#[async_trait]
pub trait NodeSweeper: Send + Sync {
	async fn cleanup(&self, node: &str, owner: &str);
}

/// Invokes `tunnel sweep` on the node over ssh.
#[derive(Debug, Clone)]
pub struct SshSweeper {
	shell: RemoteShell,
	invocation: Vec<String>,
	retries: u32,
	backoff: Duration,
}

impl SshSweeper {
	pub fn new(settings: &ClusterSettings) -> Self {
		Self {
			shell: RemoteShell::new(settings),
			invocation: settings.remote_invocation(),
			retries: settings.sweep_retries,
			backoff: Duration::from_secs(1),
		}
	}

	fn argv(&self, owner: &str) -> Vec<String> {
		let mut argv = self.invocation.clone();
		argv.extend(["sweep".to_string(), "--owner".to_string(), owner.to_string()]);
		argv
	}
}

#[async_trait]
impl NodeSweeper for SshSweeper {
	async fn cleanup(&self, node: &str, owner: &str) {
		let argv = self.argv(owner);
		for attempt in 0..=self.retries {
			if attempt > 0 {
				tokio::time::sleep(self.backoff * attempt).await;
			}
			match self.shell.run(Target::Node(node), &argv, None).await {
				Ok(output) if output.success() => {
					info!(target: "tunnel.sweep", node, owner, "remote sweep finished");
					return;
				}
				Ok(output) => {
					warn!(target: "tunnel.sweep", node, owner, attempt, error = %output.diagnostic(), "remote sweep failed");
				}
				Err(err) => {
					warn!(target: "tunnel.sweep", node, owner, attempt, error = %err, "remote sweep unreachable");
				}
			}
		}
		warn!(target: "tunnel.sweep", node, owner, "giving up on remote sweep; stale artifacts may remain");
	}
}

/// Records cleanup requests instead of performing them.
#[derive(Debug, Clone, Default)]
pub struct RecordingSweeper {
	calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingSweeper {
	pub fn new() -> Self {
		Self::default()
	}

	/// `(node, owner)` pairs in call order.
	pub fn calls(&self) -> Vec<(String, String)> {
		self.calls.lock().clone()
	}
}

#[async_trait]
impl NodeSweeper for RecordingSweeper {
	async fn cleanup(&self, node: &str, owner: &str) {
		self.calls.lock().push((node.to_string(), owner.to_string()));
	}
}
