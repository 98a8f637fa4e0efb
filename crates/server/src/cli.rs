use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "vitrine", version, about = "Remote browser isolation server")]
pub struct Cli {
	/// Interface to bind.
	#[arg(long, default_value = "127.0.0.1")]
	pub host: String,

	/// Port to listen on.
	#[arg(long, default_value_t = 8080)]
	pub port: u16,

	/// Directory holding per-session working directories. Wiped of stale
	/// sessions on startup.
	#[arg(long, default_value = "state")]
	pub state_dir: PathBuf,

	/// Baseline engine profile copied into each session's working directory.
	#[arg(long)]
	pub profile_dir: Option<PathBuf>,

	/// Worker executable. Defaults to `vitrine-worker` next to this binary.
	#[arg(long)]
	pub worker_path: Option<PathBuf>,

	/// Increase log verbosity (-v info, -vv debug).
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,
}
