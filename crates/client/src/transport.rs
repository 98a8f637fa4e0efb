//! WebSocket transport wiring for [`Driver`].
//!
//! Runs the reconnect loop with exponential backoff; every reconnect goes
//! through the driver's restore replay.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use vitrine_protocol::InputEvent;

use crate::driver::{Driver, DriverEvent};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Commands the embedding UI issues against the session.
#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
	Navigate(String),
	NewTab(Option<String>),
	FocusTab(usize),
	CloseTab(usize),
	Back,
	Forward,
	Refresh,
	Input(InputEvent),
	EndSession,
}

enum ConnectionEnd {
	/// The UI ended the session or went away.
	UserClosed,
	/// The transport dropped; reconnect and restore.
	Dropped,
}

/// Drives one session until the UI ends it.
///
/// Transport drops reconnect with backoff and replay; the function returns
/// once the command channel closes or `EndSession` is issued.
pub async fn run_session(
	server_url: &str,
	mut driver: Driver,
	events: mpsc::UnboundedSender<DriverEvent>,
	mut commands: mpsc::UnboundedReceiver<UiCommand>,
) {
	let mut delay = RECONNECT_DELAY;
	loop {
		let _ = events.send(driver.connecting());
		match connect_async(server_url).await {
			Ok((ws, _)) => {
				info!(target = "vitrine", url = server_url, "connected");
				delay = RECONNECT_DELAY;
				match drive_connection(&mut driver, ws, &events, &mut commands).await {
					ConnectionEnd::UserClosed => {
						for event in driver.on_disconnected(true) {
							let _ = events.send(event);
						}
						return;
					}
					ConnectionEnd::Dropped => {
						for event in driver.on_disconnected(false) {
							let _ = events.send(event);
						}
					}
				}
			}
			Err(err) => {
				warn!(target = "vitrine", error = %err, "connect failed");
			}
		}

		tokio::time::sleep(delay).await;
		delay = (delay * 2).min(RECONNECT_MAX_DELAY);
	}
}

async fn drive_connection(
	driver: &mut Driver,
	ws: tokio_tungstenite::WebSocketStream<
		tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
	>,
	events: &mpsc::UnboundedSender<DriverEvent>,
	commands: &mut mpsc::UnboundedReceiver<UiCommand>,
) -> ConnectionEnd {
	let (mut ws_tx, mut ws_rx) = ws.split();

	for text in driver.on_connected() {
		if ws_tx.send(Message::Text(text)).await.is_err() {
			return ConnectionEnd::Dropped;
		}
	}

	loop {
		tokio::select! {
			incoming = ws_rx.next() => match incoming {
				Some(Ok(Message::Text(text))) => {
					let (out, evs) = driver.on_text(&text);
					for text in out {
						if ws_tx.send(Message::Text(text)).await.is_err() {
							return ConnectionEnd::Dropped;
						}
					}
					for event in evs {
						if events.send(event).is_err() {
							return ConnectionEnd::UserClosed;
						}
					}
				}
				Some(Ok(Message::Close(_))) | None => return ConnectionEnd::Dropped,
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					warn!(target = "vitrine", error = %err, "websocket error");
					return ConnectionEnd::Dropped;
				}
			},
			cmd = commands.recv() => match cmd {
				Some(UiCommand::EndSession) => {
					if let Some(text) = driver.end_session() {
						let _ = ws_tx.send(Message::Text(text)).await;
					}
					return ConnectionEnd::UserClosed;
				}
				Some(cmd) => {
					if let Some(text) = encode_command(driver, cmd) {
						if ws_tx.send(Message::Text(text)).await.is_err() {
							return ConnectionEnd::Dropped;
						}
					}
				}
				None => return ConnectionEnd::UserClosed,
			}
		}
	}
}

fn encode_command(driver: &mut Driver, cmd: UiCommand) -> Option<String> {
	match cmd {
		UiCommand::Navigate(input) => driver.navigate(&input),
		UiCommand::NewTab(url) => driver.new_tab(url),
		UiCommand::FocusTab(index) => driver.focus_tab(index),
		UiCommand::CloseTab(index) => driver.close_tab(index),
		UiCommand::Back => driver.back(),
		UiCommand::Forward => driver.forward(),
		UiCommand::Refresh => driver.refresh(),
		UiCommand::Input(event) => driver.input(event),
		UiCommand::EndSession => driver.end_session(),
	}
}
