use serde::Serialize;
use tunnel_protocol::AllocationId;

use super::context::CommandContext;
use super::status::SessionArgs;
use crate::error::Result;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopData {
	pub session: String,
	pub cancelled: Vec<AllocationId>,
}

pub async fn run(args: SessionArgs, ctx: &CommandContext) -> Result<StopData> {
	let (_, config) = ctx.load_config()?;
	let session = config.session(&args.session)?;
	let cancelled = ctx.session_manager(&config).stop(&session).await?;
	Ok(StopData {
		session: session.name,
		cancelled,
	})
}
