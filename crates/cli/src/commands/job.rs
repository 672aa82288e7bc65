//! Entry point of the job body inside an allocation.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tracing::info;

use super::context::CommandContext;
use crate::config::expand_tilde;
use crate::error::Result;
use crate::job::{JobBody, JobBodyConfig, JobOutcome, LogPathVars, realize_log_path};

#[derive(Debug, Clone, Args)]
pub struct JobArgs {
	#[arg(long)]
	pub session: String,

	#[arg(long)]
	pub owner: String,

	#[arg(long)]
	pub port: u16,

	#[arg(long, value_name = "PATH")]
	pub host_key: PathBuf,

	/// Output-path template the allocation was submitted with.
	#[arg(long, value_name = "TEMPLATE")]
	pub log_path: Option<String>,

	/// Time the endpoint gets between SIGTERM and SIGKILL.
	#[arg(long, default_value_t = 20)]
	pub grace_secs: u64,
}

pub async fn run(args: JobArgs, ctx: &CommandContext) -> Result<JobOutcome> {
	let config = ctx.load_config_or_default()?;

	if let Some(template) = &args.log_path {
		let job_id = std::env::var("SLURM_JOB_ID").ok();
		let job_name = std::env::var("SLURM_JOB_NAME").ok();
		let node = std::env::var("SLURMD_NODENAME").ok();
		let path = realize_log_path(
			template,
			&LogPathVars {
				job_id: job_id.as_deref(),
				job_name: job_name.as_deref().or(Some(args.session.as_str())),
				user: Some(&args.owner),
				node: node.as_deref(),
			},
		);
		info!(target: "tunnel.job", log_path = %path.display(), allocation = job_id.as_deref().unwrap_or("-"), "job log");
	}

	let host_key = match tunnel_runtime::lookup_user(&args.owner) {
		Some(user) => expand_tilde(&args.host_key, &user.home),
		None => args.host_key,
	};

	JobBody::new(JobBodyConfig {
		session: args.session,
		owner: args.owner,
		port: args.port,
		host_key,
		grace: Duration::from_secs(args.grace_secs),
		endpoint: config.endpoint,
		sweep: config.sweep,
	})
	.run()
	.await
}
