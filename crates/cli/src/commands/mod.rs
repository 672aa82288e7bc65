mod config;
mod context;
mod job;
mod status;
mod stop;
mod sweep;
mod up;

use std::time::Instant;

use serde::Serialize;

pub use config::ConfigArgs;
pub use context::CommandContext;
pub use job::JobArgs;
pub use status::SessionArgs;
pub use sweep::SweepArgs;
pub use up::UpArgs;

use crate::cli::{Cli, Commands};
use crate::error::Result;
use crate::output::{OutputFormat, ResultBuilder, print_result};

/// Runs the selected command and prints its envelope; returns the exit code.
pub async fn dispatch(cli: Cli) -> Result<i32> {
	let ctx = CommandContext::new(cli.config, cli.format);
	let name = cli.command.name();
	let started = Instant::now();

	match cli.command {
		Commands::Up(args) => emit(name, started, up::run(args, &ctx).await?, ctx.format),
		Commands::Status(args) => emit(name, started, status::run(args, &ctx).await?, ctx.format),
		Commands::Stop(args) => emit(name, started, stop::run(args, &ctx).await?, ctx.format),
		Commands::Sweep(args) => emit(name, started, sweep::run(args, &ctx).await?, ctx.format),
		Commands::Config(args) => emit(name, started, config::run(args, &ctx).await?, ctx.format),
		Commands::Job(args) => {
			let outcome = job::run(args, &ctx).await?;
			let code = outcome.exit_code;
			emit(name, started, outcome, ctx.format);
			return Ok(code);
		}
	}

	Ok(0)
}

fn emit<T: Serialize>(name: &str, started: Instant, data: T, format: OutputFormat) {
	let result = ResultBuilder::new(name).started_at(started).data(data).build();
	print_result(&result, format);
}
