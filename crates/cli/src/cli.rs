use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::commands::{ConfigArgs, JobArgs, SessionArgs, SweepArgs, UpArgs};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "tunnel")]
#[command(about = "Keep one reachable interactive endpoint per session on a Slurm cluster")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, action = ArgAction::Count, global = true)]
	pub verbose: u8,

	/// Config file (default: $TUNNEL_CONFIG or <config_dir>/tunnel/config.json)
	#[arg(short, long, global = true, value_name = "PATH")]
	pub config: Option<PathBuf>,

	/// Output format
	#[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Replace the session's allocation and wait until its endpoint is reachable
	Up(UpArgs),
	/// Show the session's live allocations
	Status(SessionArgs),
	/// Cancel the session's allocations without resubmitting
	Stop(SessionArgs),
	/// Remove stale endpoint processes and lock artifacts
	Sweep(SweepArgs),
	/// Validate the config file and print a resolved session
	Config(ConfigArgs),
	/// Run the job body inside an allocation
	#[command(hide = true)]
	Job(JobArgs),
}

impl Commands {
	/// Name used in result envelopes.
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Up(_) => "up",
			Commands::Status(_) => "status",
			Commands::Stop(_) => "stop",
			Commands::Sweep(_) => "sweep",
			Commands::Config(_) => "config",
			Commands::Job(_) => "job",
		}
	}
}

#[cfg(test)]
mod tests {
	use clap::CommandFactory;

	use super::*;

	#[test]
	fn cli_definition_is_consistent() {
		Cli::command().debug_assert();
	}

	#[test]
	fn parses_up_with_timeout() {
		let cli = Cli::try_parse_from(["tunnel", "-vv", "--format", "json", "up", "tunnel-job", "--timeout-secs", "90"]).unwrap();
		assert_eq!(cli.verbose, 2);
		assert_eq!(cli.format, OutputFormat::Json);
		match cli.command {
			Commands::Up(args) => {
				assert_eq!(args.session, "tunnel-job");
				assert_eq!(args.timeout_secs, Some(90));
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn global_flags_follow_the_subcommand() {
		let cli = Cli::try_parse_from(["tunnel", "sweep", "--owner", "alice", "--config", "/etc/tunnel.json", "-v"]).unwrap();
		assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/etc/tunnel.json")));
		assert_eq!(cli.verbose, 1);
		assert_eq!(cli.command.name(), "sweep");
	}

	#[test]
	fn job_requires_its_arguments() {
		assert!(Cli::try_parse_from(["tunnel", "job", "--session", "tunnel-job"]).is_err());
		let cli = Cli::try_parse_from([
			"tunnel",
			"job",
			"--session",
			"tunnel-job",
			"--owner",
			"alice",
			"--port",
			"50022",
			"--host-key",
			"/home/alice/.ssh/host",
		])
		.unwrap();
		match cli.command {
			Commands::Job(args) => {
				assert_eq!(args.port, 50022);
				assert_eq!(args.grace_secs, 20);
				assert_eq!(args.log_path, None);
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn job_is_hidden_from_help() {
		let help = Cli::command().render_help().to_string();
		assert!(help.contains("sweep"));
		assert!(!help.contains("job body"));
	}
}
