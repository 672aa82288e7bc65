use clap::Args;
use serde::Serialize;

use super::context::{CommandContext, join_error};
use crate::config::invoking_user;
use crate::error::{Result, TunnelError};
use crate::sweep::{NodeSweeper, SshSweeper, SweepReport, sweep_local};

#[derive(Debug, Clone, Args)]
pub struct SweepArgs {
	/// Whose processes and artifacts to clean; defaults to the caller.
	#[arg(long, value_name = "USER")]
	pub owner: Option<String>,

	/// Sweep this compute node over ssh instead of the local host.
	#[arg(long, value_name = "HOST")]
	pub node: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "scope")]
pub enum SweepData {
	Local(SweepReport),
	Remote { node: String, owner: String },
}

pub async fn run(args: SweepArgs, ctx: &CommandContext) -> Result<SweepData> {
	let config = ctx.load_config_or_default()?;
	let owner = match args.owner {
		Some(owner) => owner,
		None => invoking_user().ok_or_else(|| TunnelError::config("cannot determine the current user; pass --owner"))?,
	};

	match args.node {
		Some(node) => {
			SshSweeper::new(&config.cluster).cleanup(&node, &owner).await;
			Ok(SweepData::Remote { node, owner })
		}
		None => {
			let rules = config.sweep;
			let report = tokio::task::spawn_blocking(move || sweep_local(&rules, &owner)).await.map_err(join_error)?;
			Ok(SweepData::Local(report))
		}
	}
}
