use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use vitrine_server::cli::Cli;
use vitrine_server::supervisor::SupervisorConfig;
use vitrine_server::{gateway, logging};

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match run(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!(target = "vitrine", error = %format!("{err:#}"), "server failed");
			ExitCode::FAILURE
		}
	}
}

async fn run(cli: Cli) -> anyhow::Result<()> {
	let worker_path = match cli.worker_path {
		Some(path) => path,
		None => {
			let exe = std::env::current_exe().context("locating server executable")?;
			exe.parent()
				.map(|dir| dir.join("vitrine-worker"))
				.context("server executable has no parent directory")?
		}
	};

	let config = SupervisorConfig {
		sessions_dir: cli.state_dir.join("sessions"),
		profile_dir: cli.profile_dir,
		worker_path,
	};

	gateway::run_server(&cli.host, cli.port, config).await
}
