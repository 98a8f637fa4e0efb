//! Connection state machine and session restore.

use std::collections::VecDeque;

use vitrine_protocol::{ClientMessage, InputEvent, SessionOptions, WorkerMessage};

use crate::address::rewrite_address;
use crate::mirror::TabMirror;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
	Disconnected,
	Connecting,
	/// `opensession` sent, `ready` (and any restore replay) outstanding.
	AwaitingReady,
	Active,
}

/// What the embedder reacts to: frames, state, and UI-relevant sync.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
	StateChanged(DriverState),
	/// Confirmed viewport; size the canvas to this.
	Viewport { width: u32, height: u32 },
	/// One compressed video frame.
	Frame(Vec<u8>),
	/// Address bar sync for the focused tab.
	AddressChanged(String),
	/// The tab strip needs redrawing from the mirror.
	TabsChanged,
	/// Session-fatal error banner.
	SessionError(String),
}

/// Tabs being replayed after a reconnect, one `newtab` per `tabinfo` ack.
struct Restore {
	queue: VecDeque<String>,
	refocus: Option<usize>,
}

/// Transport-free protocol core of the client.
///
/// The transport layer feeds it connection lifecycle calls and inbound text;
/// it answers with messages to send and events for the embedder.
pub struct Driver {
	state: DriverState,
	mirror: TabMirror,
	options: SessionOptions,
	search_template: String,
	initial_query: Option<String>,
	restore: Option<Restore>,
}

impl Driver {
	pub fn new(
		options: SessionOptions,
		search_template: impl Into<String>,
		initial_query: Option<String>,
	) -> Self {
		Self {
			state: DriverState::Disconnected,
			mirror: TabMirror::default(),
			options,
			search_template: search_template.into(),
			initial_query,
			restore: None,
		}
	}

	pub fn state(&self) -> DriverState {
		self.state
	}

	pub fn mirror(&self) -> &TabMirror {
		&self.mirror
	}

	/// A connection attempt is starting.
	pub fn connecting(&mut self) -> DriverEvent {
		self.state = DriverState::Connecting;
		self.restore = None;
		DriverEvent::StateChanged(self.state)
	}

	/// The transport is up; returns the messages to send immediately.
	pub fn on_connected(&mut self) -> Vec<String> {
		self.state = DriverState::AwaitingReady;
		vec![encode(&ClientMessage::OpenSession(self.options))]
	}

	/// The transport went down. Non-terminal drops keep the mirror so the
	/// next connection can replay it.
	pub fn on_disconnected(&mut self, terminal: bool) -> Vec<DriverEvent> {
		self.restore = None;
		self.state = if terminal {
			self.mirror.clear();
			DriverState::Disconnected
		} else {
			DriverState::Connecting
		};
		vec![DriverEvent::StateChanged(self.state)]
	}

	/// Applies one inbound text frame. Returns messages to send and events
	/// to surface, in order.
	pub fn on_text(&mut self, text: &str) -> (Vec<String>, Vec<DriverEvent>) {
		let mut out = Vec::new();
		let mut events = Vec::new();

		let Ok(msg) = serde_json::from_str::<WorkerMessage>(text) else {
			return (out, events);
		};

		match msg {
			WorkerMessage::Ready { width, height }
				if self.state == DriverState::AwaitingReady =>
			{
				self.options.width = width;
				self.options.height = height;
				events.push(DriverEvent::Viewport { width, height });

				let mut remembered: VecDeque<String> =
					self.mirror.tabs().iter().map(|t| t.url.clone()).collect();
				let refocus = self.mirror.focused();
				self.mirror.clear();

				match remembered.pop_front() {
					Some(first) => {
						self.restore = Some(Restore {
							queue: remembered,
							refocus,
						});
						out.push(encode(&ClientMessage::NewTab { url: Some(first) }));
					}
					None => {
						// First connection: open the initial tab, which may
						// carry a query-string url.
						out.push(encode(&ClientMessage::NewTab {
							url: self.initial_query.take(),
						}));
						self.set_active(&mut events);
					}
				}
			}
			WorkerMessage::Ready { .. } => {}
			WorkerMessage::TabInfo { .. } => {
				self.mirror.apply(&msg);
				events.push(DriverEvent::TabsChanged);

				// Each tabinfo acks the previous restore newtab.
				if let Some(restore) = &mut self.restore {
					match restore.queue.pop_front() {
						Some(next) => {
							out.push(encode(&ClientMessage::NewTab { url: Some(next) }));
						}
						None => {
							let refocus = restore.refocus;
							self.restore = None;
							if let Some(index) = refocus {
								self.mirror.focus(index);
								out.push(encode(&ClientMessage::FocusTab { index }));
							}
							self.set_active(&mut events);
						}
					}
				}
			}
			WorkerMessage::Url { url } => {
				self.mirror.apply(&WorkerMessage::Url { url: url.clone() });
				events.push(DriverEvent::AddressChanged(url));
			}
			WorkerMessage::TabOpen { .. } | WorkerMessage::TabClose { .. } => {
				self.mirror.apply(&msg);
				events.push(DriverEvent::TabsChanged);
			}
			WorkerMessage::Frame { data } => events.push(DriverEvent::Frame(data)),
			WorkerMessage::Error { message } => {
				events.push(DriverEvent::SessionError(message));
			}
		}

		(out, events)
	}

	fn set_active(&mut self, events: &mut Vec<DriverEvent>) {
		self.state = DriverState::Active;
		// Reaching Active also clears any error banner embedder-side.
		events.push(DriverEvent::StateChanged(self.state));
	}

	fn active(&self) -> bool {
		self.state == DriverState::Active
	}

	pub fn navigate(&self, input: &str) -> Option<String> {
		if !self.active() {
			return None;
		}
		let url = rewrite_address(input, &self.search_template);
		Some(encode(&ClientMessage::Navigate { url }))
	}

	pub fn new_tab(&self, url: Option<String>) -> Option<String> {
		self.active()
			.then(|| encode(&ClientMessage::NewTab { url }))
	}

	pub fn focus_tab(&mut self, index: usize) -> Option<String> {
		if !self.active() || index >= self.mirror.tabs().len() {
			return None;
		}
		self.mirror.focus(index);
		Some(encode(&ClientMessage::FocusTab { index }))
	}

	pub fn close_tab(&self, index: usize) -> Option<String> {
		self.active()
			.then(|| encode(&ClientMessage::CloseTab { index }))
	}

	pub fn back(&self) -> Option<String> {
		self.active().then(|| encode(&ClientMessage::Back))
	}

	pub fn forward(&self) -> Option<String> {
		self.active().then(|| encode(&ClientMessage::Forward))
	}

	pub fn refresh(&self) -> Option<String> {
		self.active().then(|| encode(&ClientMessage::Refresh))
	}

	pub fn input(&self, event: InputEvent) -> Option<String> {
		self.active()
			.then(|| encode(&ClientMessage::Event { event }))
	}

	pub fn end_session(&self) -> Option<String> {
		self.active().then(|| encode(&ClientMessage::EndSession))
	}
}

fn encode(msg: &ClientMessage) -> String {
	serde_json::to_string(msg).unwrap_or_default()
}
