use std::time::Duration;

use clap::Args;
use serde::Serialize;
use tunnel_protocol::{AllocationId, Endpoint};

use super::context::CommandContext;
use crate::error::Result;

#[derive(Debug, Clone, Args)]
pub struct UpArgs {
	/// Session name from the config file.
	#[arg(value_name = "SESSION")]
	pub session: String,

	/// Overrides `lifecycle.startup_timeout_secs`.
	#[arg(long, value_name = "SECS")]
	pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpData {
	pub session: String,
	pub allocation: AllocationId,
	pub node: String,
	pub port: u16,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub host_alias: Option<String>,
	pub endpoint: String,
}

impl From<(String, Endpoint)> for UpData {
	fn from((session, endpoint): (String, Endpoint)) -> Self {
		Self {
			session,
			endpoint: endpoint.to_string(),
			allocation: endpoint.allocation,
			node: endpoint.node,
			port: endpoint.port,
			host_alias: endpoint.host_alias,
		}
	}
}

pub async fn run(args: UpArgs, ctx: &CommandContext) -> Result<UpData> {
	let (_, config) = ctx.load_config()?;
	let session = config.session(&args.session)?;
	let timeout = args.timeout_secs.map(Duration::from_secs).unwrap_or_else(|| config.lifecycle.startup_timeout());

	let endpoint = ctx.session_manager(&config).establish_within(&session, timeout).await?;
	Ok(UpData::from((session.name, endpoint)))
}
