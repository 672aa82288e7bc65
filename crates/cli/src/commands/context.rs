use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::output::OutputFormat;
use crate::scheduler::SlurmScheduler;
use crate::session::SessionManager;
use crate::sweep::SshSweeper;

/// Global options shared by every command.
#[derive(Debug, Clone)]
pub struct CommandContext {
	pub config_path: Option<PathBuf>,
	pub format: OutputFormat,
}

impl CommandContext {
	pub fn new(config_path: Option<PathBuf>, format: OutputFormat) -> Self {
		Self { config_path, format }
	}

	/// Loads the config file; a missing file is an error.
	pub fn load_config(&self) -> Result<(PathBuf, TunnelConfig)> {
		let path = TunnelConfig::resolve_path(self.config_path.as_deref())?;
		debug!(target: "tunnel.session", path = %path.display(), "loading config");
		let config = TunnelConfig::load(&path)?;
		Ok((path, config))
	}

	/// Like [`load_config`](Self::load_config), but falls back to defaults
	/// when no config file exists. Commands that run on compute nodes use
	/// this so a node without a config still sweeps with the built-in rules.
	pub fn load_config_or_default(&self) -> Result<TunnelConfig> {
		let path = TunnelConfig::resolve_path(self.config_path.as_deref())?;
		if self.config_path.is_none() && !path.exists() {
			debug!(target: "tunnel.session", path = %path.display(), "no config file; using defaults");
			return Ok(TunnelConfig::default());
		}
		TunnelConfig::load(&path)
	}

	/// Manager wired to Slurm and ssh sweeps.
	pub fn session_manager(&self, config: &TunnelConfig) -> SessionManager {
		SessionManager::new(
			Arc::new(SlurmScheduler::new(&config.cluster)),
			Arc::new(SshSweeper::new(&config.cluster)),
			config.cluster.clone(),
			config.lifecycle.clone(),
		)
	}
}

/// Errors from `spawn_blocking` joins.
pub(crate) fn join_error(err: tokio::task::JoinError) -> TunnelError {
	TunnelError::Anyhow(anyhow::Error::from(err))
}
