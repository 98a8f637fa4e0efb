//! Worker entrypoint.
//!
//! Spawned by the `vitrine` server with one session's parameters on the
//! command line. Speaks length-prefixed JSON over stdin/stdout; logs go to
//! stderr so the pipe stays clean.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use vitrine_engine::{DEFAULT_TIMEOUT, EngineConfig};
use vitrine_protocol::{ClientMessage, WorkerMessage, clamp_viewport, pipe};
use vitrine_worker::{TabController, spawn_frame_loop};

/// Upper bound on engine startup.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// The data directory can stay pinned briefly while the engine's own
/// processes wind down, so removal retries for a while.
const DIR_REMOVE_ATTEMPTS: u32 = 20;
const DIR_REMOVE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "vitrine-worker", about = "Per-session rendering worker")]
struct Args {
    /// Viewport width in pixels.
    #[arg(long)]
    width: u32,

    /// Viewport height in pixels.
    #[arg(long)]
    height: u32,

    /// Emulate a touch-capable device.
    #[arg(long)]
    touch: bool,

    /// Session-private data directory, removed on shutdown.
    #[arg(long)]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target = "vitrine", error = %format!("{err:#}"), "worker failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let (width, height) = clamp_viewport(args.width, args.height);

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let writer = spawn_writer(outbound_rx);

    let config = EngineConfig {
        width,
        height,
        touch: args.touch,
        profile_dir: args.data_dir.clone(),
    };
    let engine = match timeout(LAUNCH_TIMEOUT, vitrine_engine::launch(config)).await {
        Ok(Ok(engine)) => engine,
        Ok(Err(err)) => {
            let _ = outbound_tx.send(WorkerMessage::Error {
                message: format!("engine launch failed: {err}"),
            });
            drop(outbound_tx);
            let _ = writer.await;
            remove_dir_with_retries(&args.data_dir).await;
            return Err(err).context("engine launch");
        }
        Err(_) => {
            let _ = outbound_tx.send(WorkerMessage::Error {
                message: "engine launch timed out".to_string(),
            });
            drop(outbound_tx);
            let _ = writer.await;
            remove_dir_with_retries(&args.data_dir).await;
            anyhow::bail!("engine launch timed out");
        }
    };
    info!(target = "vitrine", width, height, touch = args.touch, "engine up");

    // First message on the pipe; the supervisor marks the session active
    // when it sees this pass through.
    outbound_tx
        .send(WorkerMessage::Ready { width, height })
        .ok();

    let http = reqwest::Client::builder()
        .build()
        .context("building http client")?;
    let (controller, page_events) = TabController::new(engine.clone(), outbound_tx.clone(), http);
    let frame_loop = spawn_frame_loop(controller.focus_cell(), outbound_tx.clone());

    let (commands_tx, commands_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let reader = spawn_reader(commands_tx);

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    let run_loop = controller.run(commands_rx, page_events);
    tokio::pin!(run_loop);
    tokio::select! {
        _ = &mut run_loop => info!(target = "vitrine", "command stream ended"),
        _ = sigterm.recv() => info!(target = "vitrine", "received SIGTERM"),
        _ = sigint.recv() => info!(target = "vitrine", "received SIGINT"),
    }

    frame_loop.abort();
    reader.abort();

    match timeout(DEFAULT_TIMEOUT, engine.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(target = "vitrine", error = %err, "engine close failed"),
        Err(_) => debug!(target = "vitrine", "engine close timed out"),
    }

    // Dropping the last sender lets the writer drain queued frames and exit.
    drop(outbound_tx);
    let _ = timeout(DEFAULT_TIMEOUT, writer).await;

    remove_dir_with_retries(&args.data_dir).await;
    info!(target = "vitrine", "worker shut down");
    Ok(())
}

/// Serializes outbound messages onto stdout until the channel closes or the
/// pipe breaks.
fn spawn_writer(mut outbound: mpsc::UnboundedReceiver<WorkerMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = outbound.recv().await {
            let payload = match serde_json::to_string(&msg) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(target = "vitrine", error = %err, "message serialization failed");
                    continue;
                }
            };
            if let Err(err) = pipe::write_frame(&mut stdout, &payload).await {
                debug!(target = "vitrine", error = %err, "stdout pipe closed");
                break;
            }
        }
    })
}

/// Decodes relayed commands off stdin. Dropping the sender on end of stream
/// is what tells the controller to stop.
fn spawn_reader(commands: mpsc::UnboundedSender<ClientMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        loop {
            match pipe::read_frame(&mut stdin).await {
                Ok(Some(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(cmd) => {
                        if commands.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(target = "vitrine", error = %err, "dropping unparseable command");
                    }
                },
                Ok(None) => {
                    info!(target = "vitrine", "stdin closed");
                    break;
                }
                Err(err) => {
                    warn!(target = "vitrine", error = %err, "stdin pipe error");
                    break;
                }
            }
        }
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
                    "data dir removal failed"
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
        "giving up on data dir removal"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_the_data_dir_recursively() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("session");
        tokio::fs::create_dir_all(target.join("profile"))
            .await
            .unwrap();
        tokio::fs::write(target.join("profile").join("prefs"), b"{}")
            .await
            .unwrap();

        remove_dir_with_retries(&target).await;
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn missing_data_dir_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        remove_dir_with_retries(&root.path().join("never-created")).await;
    }
}
