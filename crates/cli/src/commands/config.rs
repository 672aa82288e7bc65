use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tunnel_protocol::Session;

use super::context::CommandContext;
use crate::config::TunnelConfig;
use crate::error::Result;

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
	/// Resolve and validate one session instead of printing the whole file.
	#[arg(value_name = "SESSION")]
	pub session: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum ConfigData {
	Session { path: PathBuf, session: Session },
	File { path: PathBuf, config: TunnelConfig },
}

pub async fn run(args: ConfigArgs, ctx: &CommandContext) -> Result<ConfigData> {
	let (path, config) = ctx.load_config()?;
	match args.session {
		Some(name) => Ok(ConfigData::Session {
			session: config.session(&name)?,
			path,
		}),
		None => Ok(ConfigData::File { path, config }),
	}
}
