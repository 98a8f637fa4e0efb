//! Client-side mirror of the worker's tab sequence.

use vitrine_protocol::WorkerMessage;

/// Last-known metadata for one remote tab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabEntry {
	pub url: String,
	pub title: String,
	pub favicon: String,
}

/// Positional bookkeeping kept in lockstep with worker notifications.
///
/// Indices compact on close exactly like the worker's sequence, so the
/// mirror and the remote state agree on what every index names.
#[derive(Debug, Default)]
pub struct TabMirror {
	tabs: Vec<TabEntry>,
	focused: Option<usize>,
}

impl TabMirror {
	pub fn tabs(&self) -> &[TabEntry] {
		&self.tabs
	}

	pub fn focused(&self) -> Option<usize> {
		self.focused
	}

	pub fn focused_tab(&self) -> Option<&TabEntry> {
		self.focused.and_then(|i| self.tabs.get(i))
	}

	/// Records a locally requested focus change.
	pub fn focus(&mut self, index: usize) {
		if index < self.tabs.len() {
			self.focused = Some(index);
		}
	}

	pub fn clear(&mut self) {
		self.tabs.clear();
		self.focused = None;
	}

	/// Applies one worker notification.
	pub fn apply(&mut self, msg: &WorkerMessage) {
		match msg {
			WorkerMessage::TabOpen { .. } => {
				// New tabs always land at the end and take focus.
				self.tabs.push(TabEntry::default());
				self.focused = Some(self.tabs.len() - 1);
			}
			WorkerMessage::TabClose { index } => {
				if *index < self.tabs.len() {
					self.tabs.remove(*index);
					self.focused = match self.focused {
						_ if self.tabs.is_empty() => None,
						Some(f) if f == *index => {
							Some(index.saturating_sub(1).min(self.tabs.len() - 1))
						}
						Some(f) if f > *index => Some(f - 1),
						other => other,
					};
				}
			}
			WorkerMessage::TabInfo {
				index,
				title,
				favicon,
			} => {
				if let Some(tab) = self.tabs.get_mut(*index) {
					tab.title = title.clone();
					tab.favicon = favicon.clone();
				}
			}
			WorkerMessage::Url { url } => {
				// The worker reports the focused tab's address.
				if let Some(tab) = self.focused.and_then(|i| self.tabs.get_mut(i)) {
					tab.url = url.clone();
				}
			}
			WorkerMessage::Ready { .. } | WorkerMessage::Frame { .. } | WorkerMessage::Error { .. } => {}
		}
	}
}
