//! Session protocol messages.

use serde::{Deserialize, Serialize};

use crate::input::InputEvent;

/// Smallest accepted viewport edge in pixels.
pub const VIEWPORT_MIN: u32 = 300;
/// Largest accepted viewport edge in pixels.
pub const VIEWPORT_MAX: u32 = 1280;

/// Clamps a requested viewport into the accepted range.
pub fn clamp_viewport(width: u32, height: u32) -> (u32, u32) {
    (
        width.clamp(VIEWPORT_MIN, VIEWPORT_MAX),
        height.clamp(VIEWPORT_MIN, VIEWPORT_MAX),
    )
}

/// Payload of the session-open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Requested viewport width in pixels
    pub width: u32,
    /// Requested viewport height in pixels
    pub height: u32,
    /// Whether the client device has a touch screen
    pub touch: bool,
}

/// Messages flowing client → gateway → worker.
///
/// `OpenSession` and `EndSession` are consumed by the gateway; everything
/// else is relayed verbatim to the session's worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Start a session with the given viewport and capabilities.
    OpenSession(SessionOptions),
    /// Tear down the current session, leaving the connection open.
    EndSession,
    /// Open a tab, optionally navigating it.
    NewTab {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Navigate the focused tab.
    Navigate { url: String },
    /// History back on the focused tab.
    Back,
    /// History forward on the focused tab.
    Forward,
    /// Reload the focused tab.
    Refresh,
    /// Move focus to the tab at `index`.
    FocusTab { index: usize },
    /// Close the tab at `index`.
    CloseTab { index: usize },
    /// Inject one input event into the focused tab.
    Event { event: InputEvent },
    /// Ask the worker to shut down gracefully. Sent by the supervisor, never
    /// by clients directly.
    Stop,
}

/// Messages flowing worker → gateway → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// Confirms the session is live and carries the final clamped viewport.
    Ready { width: u32, height: u32 },
    /// Address bar sync for the focused tab.
    Url { url: String },
    /// Metadata for the tab at `index`. Favicon is a data URI or empty.
    TabInfo {
        index: usize,
        title: String,
        favicon: String,
    },
    /// A tab was created at `index` (always the end of the sequence).
    TabOpen { index: usize },
    /// The tab at `index` was removed; later tabs shift down by one.
    TabClose { index: usize },
    /// One compressed video frame of the focused tab.
    Frame {
        #[serde(with = "crate::base64_bytes")]
        data: Vec<u8>,
    },
    /// Session-fatal error surfaced to the client banner.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MouseButton;

    #[test]
    fn clamp_viewport_bounds() {
        assert_eq!(clamp_viewport(100, 5000), (300, 1280));
        assert_eq!(clamp_viewport(1024, 768), (1024, 768));
        assert_eq!(clamp_viewport(300, 1280), (300, 1280));
    }

    #[test]
    fn open_session_wire_shape() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"opensession","width":1024,"height":768,"touch":false}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::OpenSession(SessionOptions {
                width: 1024,
                height: 768,
                touch: false,
            })
        );
    }

    #[test]
    fn open_session_rejects_wrong_types() {
        // Width as a string must fail deserialization, not coerce.
        let result = serde_json::from_str::<ClientMessage>(
            r#"{"type":"opensession","width":"1024","height":768,"touch":false}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn newtab_url_is_optional() {
        let bare: ClientMessage = serde_json::from_str(r#"{"type":"newtab"}"#).unwrap();
        assert_eq!(bare, ClientMessage::NewTab { url: None });

        let with_url: ClientMessage =
            serde_json::from_str(r#"{"type":"newtab","url":"https://example.com"}"#).unwrap();
        assert_eq!(
            with_url,
            ClientMessage::NewTab {
                url: Some("https://example.com".to_string()),
            }
        );
    }

    #[test]
    fn event_nests_the_input_payload() {
        let msg = ClientMessage::Event {
            event: InputEvent::MouseMove {
                x: 1.0,
                y: 2.0,
                button: MouseButton::Left,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["type"], "mousemove");
    }

    #[test]
    fn frame_data_is_base64_text() {
        let msg = WorkerMessage::Frame {
            data: vec![0xff, 0xd8, 0xff],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "frame");
        assert_eq!(json["data"], "/9j/");

        let back: WorkerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn tab_notifications_carry_indices() {
        let open: WorkerMessage = serde_json::from_str(r#"{"type":"tabopen","index":2}"#).unwrap();
        assert_eq!(open, WorkerMessage::TabOpen { index: 2 });

        let close: WorkerMessage =
            serde_json::from_str(r#"{"type":"tabclose","index":0}"#).unwrap();
        assert_eq!(close, WorkerMessage::TabClose { index: 0 });
    }

    #[test]
    fn unknown_message_kind_is_an_error() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
    }
}
