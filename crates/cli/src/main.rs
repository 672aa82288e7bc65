use std::process::ExitCode;

use clap::Parser;
use tunnel::cli::Cli;
use tunnel::output::print_error;
use tunnel::{commands, logging};

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let format = cli.format;
	let command = cli.command.name();
	let code = match commands::dispatch(cli).await {
		Ok(code) => code,
		Err(err) => {
			tracing::debug!(target: "tunnel.session", error = ?err, "command failed");
			print_error(command, &err, format);
			err.exit_code()
		}
	};
	ExitCode::from(u8::try_from(code).unwrap_or(1))
}
