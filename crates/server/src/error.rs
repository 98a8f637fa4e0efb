use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to spawn worker {path}: {source}")]
	Spawn {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error(transparent)]
	Pipe(#[from] vitrine_protocol::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
