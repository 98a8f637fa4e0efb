//! WebSocket gateway.
//!
//! One connection carries at most one live session. Session control messages
//! (`opensession`, `endsession`) are handled here; everything else passes to
//! the session's worker byte for byte.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use vitrine_protocol::{ClientMessage, SessionOptions, WorkerMessage, clamp_viewport};

use crate::supervisor::{Session, SupervisorConfig, wipe_sessions_dir};

pub struct GatewayState {
	supervisor: SupervisorConfig,
	sessions: Mutex<HashMap<u64, Arc<Session>>>,
	next_conn_id: AtomicU64,
}

type SharedState = Arc<GatewayState>;

pub async fn run_server(host: &str, port: u16, config: SupervisorConfig) -> Result<()> {
	wipe_sessions_dir(&config.sessions_dir)
		.await
		.context("preparing sessions directory")?;

	let state: SharedState = Arc::new(GatewayState {
		supervisor: config,
		sessions: Mutex::new(HashMap::new()),
		next_conn_id: AtomicU64::new(0),
	});

	let app = Router::new()
		.route("/healthz", get(|| async { "OK" }))
		.route(
			"/ws",
			get(
				|ws: WebSocketUpgrade, State(state): State<SharedState>| async move {
					ws.on_upgrade(|socket| handle_client_socket(socket, state))
				},
			),
		)
		.with_state(state.clone());

	let addr: SocketAddr = format!("{host}:{port}")
		.parse()
		.with_context(|| format!("invalid host/port combination: {host}:{port}"))?;

	info!(target = "vitrine", host, port, "starting session server");

	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("failed to bind {addr}"))?;

	axum::serve(listener, app.into_make_service())
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("server error")?;

	// End sessions that outlived their connections before exiting.
	let sessions: Vec<Arc<Session>> = state.sessions.lock().drain().map(|(_, s)| s).collect();
	for session in sessions {
		session.teardown().await;
	}
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = tokio::signal::ctrl_c();

	#[cfg(unix)]
	{
		let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(sigterm) => sigterm,
			Err(_) => {
				let _ = ctrl_c.await;
				return;
			}
		};
		tokio::select! {
			_ = ctrl_c => {}
			_ = sigterm.recv() => {}
		}
	}

	#[cfg(not(unix))]
	{
		let _ = ctrl_c.await;
	}

	info!(target = "vitrine", "shutdown signal received");
}

async fn handle_client_socket(socket: WebSocket, state: SharedState) {
	let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
	info!(target = "vitrine", conn = conn_id, "client connected");

	let (to_client, outbound) = mpsc::unbounded_channel::<Message>();
	let mut outbound_stream = UnboundedReceiverStream::new(outbound);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(msg) = outbound_stream.next().await {
			if ws_tx.send(msg).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => {
				if !handle_client_text(&state, conn_id, &to_client, text.as_str()).await {
					break;
				}
			}
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "vitrine", conn = conn_id, error = %err, "client websocket error");
				break;
			}
		}
	}

	// Disconnect ends the connection's session.
	let session = state.sessions.lock().remove(&conn_id);
	if let Some(session) = session {
		session.teardown().await;
	}
	send_task.abort();
	info!(target = "vitrine", conn = conn_id, "client disconnected");
}

/// Applies one inbound text frame. Returns `false` to close the connection.
async fn handle_client_text(
	state: &SharedState,
	conn_id: u64,
	to_client: &mpsc::UnboundedSender<Message>,
	text: &str,
) -> bool {
	let current = {
		let mut sessions = state.sessions.lock();
		// A worker that died on its own leaves an ended session behind; the
		// connection is then free for a fresh opensession.
		if sessions.get(&conn_id).is_some_and(|s| s.is_ended()) {
			sessions.remove(&conn_id);
		}
		sessions.get(&conn_id).cloned()
	};

	match current {
		None => match serde_json::from_str::<ClientMessage>(text) {
			Ok(ClientMessage::OpenSession(options)) => {
				open_session(state, conn_id, to_client, options).await;
				true
			}
			// Ending a session that does not exist is a harmless no-op.
			Ok(ClientMessage::EndSession) => true,
			Ok(_) | Err(_) => {
				warn!(
					target = "vitrine",
					conn = conn_id,
					"protocol violation before session start"
				);
				false
			}
		},
		Some(session) => match serde_json::from_str::<ClientMessage>(text) {
			Ok(ClientMessage::OpenSession(_)) => {
				warn!(
					target = "vitrine",
					conn = conn_id,
					"second opensession on one connection"
				);
				false
			}
			Ok(ClientMessage::EndSession) => {
				state.sessions.lock().remove(&conn_id);
				session.teardown().await;
				true
			}
			Ok(ClientMessage::Stop) => {
				// Reserved for the supervisor's own shutdown path.
				warn!(target = "vitrine", conn = conn_id, "ignoring reserved stop message");
				true
			}
			// Everything else belongs to the worker, byte for byte.
			Ok(_) | Err(_) => {
				session.relay(text.to_string());
				true
			}
		},
	}
}

async fn open_session(
	state: &SharedState,
	conn_id: u64,
	to_client: &mpsc::UnboundedSender<Message>,
	options: SessionOptions,
) {
	let (width, height) = clamp_viewport(options.width, options.height);
	let options = SessionOptions {
		width,
		height,
		touch: options.touch,
	};

	match Session::spawn(&state.supervisor, &options, to_client.clone()).await {
		Ok(session) => {
			state.sessions.lock().insert(conn_id, session);
		}
		Err(err) => {
			warn!(target = "vitrine", conn = conn_id, error = %err, "session start failed");
			send_error(to_client, format!("session start failed: {err}"));
		}
	}
}

fn send_error(to_client: &mpsc::UnboundedSender<Message>, message: String) {
	if let Ok(payload) = serde_json::to_string(&WorkerMessage::Error { message }) {
		let _ = to_client.send(Message::Text(payload.into()));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_state(root: &std::path::Path) -> SharedState {
		test_state_with_worker(root, root.join("no-such-worker"))
	}

	fn test_state_with_worker(root: &std::path::Path, worker_path: std::path::PathBuf) -> SharedState {
		Arc::new(GatewayState {
			supervisor: SupervisorConfig {
				sessions_dir: root.join("sessions"),
				profile_dir: None,
				worker_path,
			},
			sessions: Mutex::new(HashMap::new()),
			next_conn_id: AtomicU64::new(0),
		})
	}

	/// A stand-in worker that accepts any flags and stays alive.
	fn idle_worker(root: &std::path::Path) -> std::path::PathBuf {
		use std::os::unix::fs::PermissionsExt;
		let path = root.join("idle-worker.sh");
		std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
		std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
		path
	}

	#[tokio::test]
	async fn malformed_presession_frame_closes_the_connection() {
		let root = tempfile::tempdir().unwrap();
		let state = test_state(root.path());
		let (tx, _rx) = mpsc::unbounded_channel();

		assert!(!handle_client_text(&state, 0, &tx, "{not json").await);
		assert!(!handle_client_text(&state, 0, &tx, r#"{"type":"navigate","url":"https://x/"}"#).await);
	}

	#[tokio::test]
	async fn presession_endsession_is_a_noop() {
		let root = tempfile::tempdir().unwrap();
		let state = test_state(root.path());
		let (tx, _rx) = mpsc::unbounded_channel();

		assert!(handle_client_text(&state, 0, &tx, r#"{"type":"endsession"}"#).await);
	}

	#[tokio::test]
	async fn second_opensession_closes_the_connection() {
		let root = tempfile::tempdir().unwrap();
		let state = test_state_with_worker(root.path(), idle_worker(root.path()));
		let (tx, _rx) = mpsc::unbounded_channel();

		let open = r#"{"type":"opensession","width":800,"height":600,"touch":false}"#;
		assert!(handle_client_text(&state, 0, &tx, open).await);
		assert!(state.sessions.lock().contains_key(&0));

		// One live session per connection; a second open is a violation.
		assert!(!handle_client_text(&state, 0, &tx, open).await);

		// The same message on another connection is unaffected.
		assert!(handle_client_text(&state, 1, &tx, open).await);

		// kill_on_drop reaps the stand-in workers.
		state.sessions.lock().clear();
	}

	#[tokio::test]
	async fn failed_session_start_reports_an_error_banner() {
		let root = tempfile::tempdir().unwrap();
		let state = test_state(root.path());
		let (tx, mut rx) = mpsc::unbounded_channel();

		let open = r#"{"type":"opensession","width":800,"height":600,"touch":false}"#;
		assert!(handle_client_text(&state, 0, &tx, open).await);

		let Some(Message::Text(text)) = rx.recv().await else {
			panic!("expected an error message");
		};
		let msg: WorkerMessage = serde_json::from_str(text.as_str()).unwrap();
		assert!(matches!(msg, WorkerMessage::Error { .. }));
		// No session was registered.
		assert!(state.sessions.lock().is_empty());
	}
}
