use clap::Args;
use serde::Serialize;
use tunnel_protocol::AllocationStatus;

use super::context::CommandContext;
use crate::error::Result;

#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
	#[arg(value_name = "SESSION")]
	pub session: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
	pub session: String,
	pub owner: String,
	pub allocations: Vec<AllocationStatus>,
}

pub async fn run(args: SessionArgs, ctx: &CommandContext) -> Result<StatusData> {
	let (_, config) = ctx.load_config()?;
	let session = config.session(&args.session)?;
	let allocations = ctx.session_manager(&config).status(&session).await?;
	Ok(StatusData {
		session: session.name,
		owner: session.owner,
		allocations,
	})
}
