//! Per-session worker supervision.
//!
//! One [`Session`] owns one worker process: a private working directory, the
//! stdio pipe relay, and an idempotent teardown that is reached exactly once
//! no matter which side dies first.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::Message;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use vitrine_protocol::{ClientMessage, SessionOptions, WorkerMessage, pipe};

use crate::error::{Result, ServerError};

/// Grace period between sending `stop` and escalating to kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Host-side working-directory removal retries. The worker normally removes
/// the directory itself; this covers kills and abnormal exits.
const DIR_REMOVE_ATTEMPTS: u32 = 5;
const DIR_REMOVE_DELAY: Duration = Duration::from_millis(500);

/// Environment variables the worker inherits. Everything else is dropped;
/// engine configuration travels through command-line flags only.
const WORKER_ENV_ALLOWLIST: [&str; 3] = ["PATH", "HOME", "LANG"];

/// Where session working directories live and how to launch workers.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	pub sessions_dir: PathBuf,
	pub profile_dir: Option<PathBuf>,
	pub worker_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Worker spawned, `ready` not yet observed.
	Starting,
	/// `ready` passed through; the session is serving.
	Active,
	/// Teardown in progress.
	Ending,
	/// Worker gone, working directory removed.
	Ended,
}

/// Everything teardown needs, taken out of its slot exactly once.
struct TeardownHandle {
	child: Child,
	to_worker: mpsc::UnboundedSender<String>,
	dir: PathBuf,
}

type TeardownSlot = Arc<tokio::sync::Mutex<Option<TeardownHandle>>>;

/// A live (or winding-down) session.
pub struct Session {
	state: Arc<Mutex<SessionState>>,
	to_worker: mpsc::UnboundedSender<String>,
	slot: TeardownSlot,
}

impl Session {
	/// Spawns a worker for `options` and wires the relay to `to_client`.
	///
	/// On failure the working directory is already cleaned up; the caller
	/// only needs to report the error to the client.
	pub async fn spawn(
		config: &SupervisorConfig,
		options: &SessionOptions,
		to_client: mpsc::UnboundedSender<Message>,
	) -> Result<Arc<Self>> {
		let dir = create_session_dir(&config.sessions_dir).await?;

		if let Some(profile) = &config.profile_dir {
			if let Err(err) = copy_dir_recursive(profile, &dir).await {
				remove_dir_with_retries(&dir).await;
				return Err(err.into());
			}
		}

		let mut cmd = Command::new(&config.worker_path);
		cmd.arg("--width")
			.arg(options.width.to_string())
			.arg("--height")
			.arg(options.height.to_string());
		if options.touch {
			cmd.arg("--touch");
		}
		cmd.arg("--data-dir").arg(&dir);

		cmd.env_clear();
		for key in WORKER_ENV_ALLOWLIST {
			if let Ok(value) = std::env::var(key) {
				cmd.env(key, value);
			}
		}

		cmd.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true);

		let mut child = match cmd.spawn() {
			Ok(child) => child,
			Err(source) => {
				remove_dir_with_retries(&dir).await;
				return Err(ServerError::Spawn {
					path: config.worker_path.clone(),
					source,
				});
			}
		};

		let stdin = take_pipe(child.stdin.take(), "stdin")?;
		let stdout = take_pipe(child.stdout.take(), "stdout")?;

		let state = Arc::new(Mutex::new(SessionState::Starting));
		let (to_worker, from_gateway) = mpsc::unbounded_channel::<String>();
		let slot: TeardownSlot = Arc::new(tokio::sync::Mutex::new(Some(TeardownHandle {
			child,
			to_worker: to_worker.clone(),
			dir: dir.clone(),
		})));

		spawn_writer(stdin, from_gateway);
		let reader = spawn_reader(stdout, state.clone(), to_client);

		// Worker exit (or a broken pipe) surfaces as the reader finishing;
		// that must reach Ended even if the gateway never calls teardown.
		{
			let state = state.clone();
			let slot = slot.clone();
			tokio::spawn(async move {
				let _ = reader.await;
				run_teardown(&state, &slot).await;
			});
		}

		info!(target = "vitrine", dir = %dir.display(), "session starting");
		Ok(Arc::new(Self {
			state,
			to_worker,
			slot,
		}))
	}

	pub fn state(&self) -> SessionState {
		*self.state.lock()
	}

	pub fn is_ended(&self) -> bool {
		self.state() == SessionState::Ended
	}

	/// Relays one client text frame to the worker, verbatim.
	pub fn relay(&self, text: String) {
		let _ = self.to_worker.send(text);
	}

	/// Tears the session down. Safe to call from multiple entry points;
	/// only the first caller does the work.
	pub async fn teardown(&self) {
		run_teardown(&self.state, &self.slot).await;
	}
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T> {
	pipe.ok_or_else(|| ServerError::Io(std::io::Error::other(format!("worker {name} not piped"))))
}

/// Client -> worker half of the relay. FIFO by construction: one channel,
/// one writer task.
fn spawn_writer(
	mut stdin: impl AsyncWrite + Unpin + Send + 'static,
	mut from_gateway: mpsc::UnboundedReceiver<String>,
) {
	tokio::spawn(async move {
		while let Some(text) = from_gateway.recv().await {
			if let Err(err) = pipe::write_frame(&mut stdin, &text).await {
				debug!(target = "vitrine", error = %err, "worker stdin closed");
				break;
			}
		}
	});
}

/// Worker -> client half of the relay. Frames pass through verbatim; `ready`
/// is observed on the way past to flip the session active.
///
/// The send happens under the state lock: once teardown has flipped the
/// state to `Ending`, no further worker output can reach the client. The
/// pipe keeps draining so a worker flushing frames can still exit.
fn spawn_reader(
	mut stdout: impl AsyncRead + Unpin + Send + 'static,
	state: Arc<Mutex<SessionState>>,
	to_client: mpsc::UnboundedSender<Message>,
) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			match pipe::read_frame(&mut stdout).await {
				Ok(Some(text)) => {
					let mut st = state.lock();
					if *st == SessionState::Starting
						&& matches!(
							serde_json::from_str::<WorkerMessage>(&text),
							Ok(WorkerMessage::Ready { .. })
						) {
						*st = SessionState::Active;
						info!(target = "vitrine", "session active");
					}
					match *st {
						SessionState::Starting | SessionState::Active => {
							if to_client.send(Message::Text(text.into())).is_err() {
								// Client connection is gone; the gateway
								// tears down.
								break;
							}
						}
						SessionState::Ending | SessionState::Ended => {
							debug!(target = "vitrine", "dropping worker output during teardown");
						}
					}
				}
				Ok(None) => {
					info!(target = "vitrine", "worker closed its pipe");
					break;
				}
				Err(err) => {
					warn!(target = "vitrine", error = %err, "worker pipe error");
					break;
				}
			}
		}
	})
}

async fn run_teardown(state: &Arc<Mutex<SessionState>>, slot: &TeardownSlot) {
	let Some(mut handle) = slot.lock().await.take() else {
		return;
	};
	// Flipping to Ending unregisters the worker -> client direction: the
	// reader drops every frame it reads from here on.
	*state.lock() = SessionState::Ending;
	info!(target = "vitrine", "session ending");

	if let Ok(stop) = serde_json::to_string(&ClientMessage::Stop) {
		let _ = handle.to_worker.send(stop);
	}

	match timeout(STOP_GRACE, handle.child.wait()).await {
		Ok(Ok(status)) if status.success() => {
			debug!(target = "vitrine", "worker exited cleanly");
		}
		Ok(Ok(status)) => {
			warn!(target = "vitrine", %status, "worker exited abnormally");
		}
		Ok(Err(err)) => {
			warn!(target = "vitrine", error = %err, "waiting for worker failed");
			let _ = handle.child.start_kill();
		}
		Err(_) => {
			warn!(target = "vitrine", "worker ignored stop; killing");
			let _ = handle.child.start_kill();
			let _ = timeout(Duration::from_millis(500), handle.child.wait()).await;
		}
	}

	// The worker removes the directory on the graceful path; this covers
	// kills and crashes, and is a fast no-op otherwise.
	remove_dir_with_retries(&handle.dir).await;

	*state.lock() = SessionState::Ended;
	info!(target = "vitrine", "session ended");
}

/// Removes stale session directories from a previous run.
pub async fn wipe_sessions_dir(sessions_dir: &Path) -> std::io::Result<()> {
	match tokio::fs::remove_dir_all(sessions_dir).await {
		Ok(()) => {}
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
		Err(err) => return Err(err),
	}
	tokio::fs::create_dir_all(sessions_dir).await
}

/// Creates `<sessions-dir>/<hex-millis>`, bumping the name on collision.
async fn create_session_dir(sessions_dir: &Path) -> std::io::Result<PathBuf> {
	tokio::fs::create_dir_all(sessions_dir).await?;
	let millis = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis())
		.unwrap_or(0);

	let mut bump = 0u128;
	loop {
		let dir = sessions_dir.join(format!("{:x}", millis + bump));
		match tokio::fs::create_dir(&dir).await {
			Ok(()) => return Ok(dir),
			Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => bump += 1,
			Err(err) => return Err(err),
		}
	}
}

/// Copies the baseline profile into the session directory. Symlinks are
/// skipped.
fn copy_dir_recursive<'a>(
	src: &'a Path,
	dst: &'a Path,
) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
	Box::pin(async move {
		tokio::fs::create_dir_all(dst).await?;
		let mut entries = tokio::fs::read_dir(src).await?;
		while let Some(entry) = entries.next_entry().await? {
			let file_type = entry.file_type().await?;
			let to = dst.join(entry.file_name());
			if file_type.is_dir() {
				copy_dir_recursive(&entry.path(), &to).await?;
			} else if file_type.is_file() {
				tokio::fs::copy(entry.path(), &to).await?;
			}
		}
		Ok(())
	})
}

async fn remove_dir_with_retries(dir: &Path) {
	for attempt in 1..=DIR_REMOVE_ATTEMPTS {
		match tokio::fs::remove_dir_all(dir).await {
			Ok(()) => return,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
			Err(err) => {
				debug!(
					target = "vitrine",
					error = %err,
					attempt,
					"session dir removal failed"
				);
				if attempt < DIR_REMOVE_ATTEMPTS {
					tokio::time::sleep(DIR_REMOVE_DELAY).await;
				}
			}
		}
	}
	warn!(
		target = "vitrine",
		dir = %dir.display(),
		"giving up on session dir removal"
	);
}

#[cfg(test)]
mod tests {
	use super::*;

	fn options() -> SessionOptions {
		SessionOptions {
			width: 800,
			height: 600,
			touch: false,
		}
	}

	/// Writes an executable stand-in worker script.
	fn write_script(path: &Path, body: &str) {
		use std::os::unix::fs::PermissionsExt;
		std::fs::write(path, body).unwrap();
		std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
	}

	async fn wait_for_ended(session: &Session) {
		timeout(Duration::from_secs(10), async {
			while !session.is_ended() {
				tokio::time::sleep(Duration::from_millis(25)).await;
			}
		})
		.await
		.expect("session never reached Ended");
	}

	#[tokio::test]
	async fn session_dirs_are_unique() {
		let root = tempfile::tempdir().unwrap();
		let a = create_session_dir(root.path()).await.unwrap();
		let b = create_session_dir(root.path()).await.unwrap();
		assert_ne!(a, b);
		assert!(a.is_dir());
		assert!(b.is_dir());
	}

	#[tokio::test]
	async fn profile_copy_is_recursive() {
		let root = tempfile::tempdir().unwrap();
		let src = root.path().join("profile");
		tokio::fs::create_dir_all(src.join("nested")).await.unwrap();
		tokio::fs::write(src.join("prefs"), b"{}").await.unwrap();
		tokio::fs::write(src.join("nested").join("cookies"), b"x")
			.await
			.unwrap();

		let dst = root.path().join("session");
		copy_dir_recursive(&src, &dst).await.unwrap();

		assert!(dst.join("prefs").is_file());
		assert!(dst.join("nested").join("cookies").is_file());
	}

	#[tokio::test]
	async fn wipe_recreates_an_empty_dir() {
		let root = tempfile::tempdir().unwrap();
		let sessions = root.path().join("sessions");
		tokio::fs::create_dir_all(sessions.join("stale"))
			.await
			.unwrap();

		wipe_sessions_dir(&sessions).await.unwrap();

		assert!(sessions.is_dir());
		assert!(!sessions.join("stale").exists());
	}

	#[tokio::test]
	async fn spawn_failure_cleans_the_session_dir() {
		let root = tempfile::tempdir().unwrap();
		let config = SupervisorConfig {
			sessions_dir: root.path().to_path_buf(),
			profile_dir: None,
			worker_path: root.path().join("no-such-worker"),
		};
		let (to_client, _rx) = mpsc::unbounded_channel();

		let err = Session::spawn(&config, &options(), to_client)
			.await
			.err()
			.expect("spawn must fail");
		assert!(matches!(err, ServerError::Spawn { .. }));

		let mut entries = tokio::fs::read_dir(root.path()).await.unwrap();
		assert!(entries.next_entry().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn worker_exit_reaches_ended_and_removes_the_dir() {
		let root = tempfile::tempdir().unwrap();
		let config = SupervisorConfig {
			sessions_dir: root.path().to_path_buf(),
			profile_dir: None,
			// Not a real worker: rejects the flags and exits at once, which
			// exercises the abnormal-exit teardown path.
			worker_path: PathBuf::from("/bin/sh"),
		};
		let (to_client, _rx) = mpsc::unbounded_channel();

		let session = Session::spawn(&config, &options(), to_client)
			.await
			.unwrap();
		wait_for_ended(&session).await;

		let mut entries = tokio::fs::read_dir(root.path()).await.unwrap();
		assert!(entries.next_entry().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn teardown_stops_the_worker_to_client_relay() {
		let root = tempfile::tempdir().unwrap();
		let worker = root.path().join("chatty-worker.sh");
		// Emits framed url messages on a steady cadence, ignores stop, and
		// exits on its own after two seconds.
		write_script(
			&worker,
			r#"#!/bin/sh
i=0
while [ "$i" -lt 40 ]; do
	printf '\030\000\000\000{"type":"url","url":"x"}'
	i=$((i+1))
	sleep 0.05
done
"#,
		);
		let config = SupervisorConfig {
			sessions_dir: root.path().join("sessions"),
			profile_dir: None,
			worker_path: worker,
		};
		let (to_client, mut rx) = mpsc::unbounded_channel();

		let session = Session::spawn(&config, &options(), to_client)
			.await
			.unwrap();

		timeout(Duration::from_secs(5), rx.recv())
			.await
			.expect("no worker output relayed")
			.expect("client channel closed early");

		let teardown = tokio::spawn({
			let session = session.clone();
			async move { session.teardown().await }
		});
		timeout(Duration::from_secs(5), async {
			while session.state() == SessionState::Starting {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("teardown never reached Ending");

		// Frames relayed before Ending may still sit in the channel. Once
		// drained, nothing more may arrive while the worker keeps emitting.
		while rx.try_recv().is_ok() {}
		tokio::time::sleep(Duration::from_millis(400)).await;
		assert!(
			rx.try_recv().is_err(),
			"worker output was relayed after Ending began"
		);

		teardown.await.unwrap();
		wait_for_ended(&session).await;
	}

	#[tokio::test]
	async fn teardown_is_idempotent() {
		let root = tempfile::tempdir().unwrap();
		let config = SupervisorConfig {
			sessions_dir: root.path().to_path_buf(),
			profile_dir: None,
			worker_path: PathBuf::from("/bin/sh"),
		};
		let (to_client, _rx) = mpsc::unbounded_channel();

		let session = Session::spawn(&config, &options(), to_client)
			.await
			.unwrap();
		session.teardown().await;
		session.teardown().await;
		wait_for_ended(&session).await;
		assert_eq!(session.state(), SessionState::Ended);
	}
}
