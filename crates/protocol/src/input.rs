//! Input events forwarded from the client canvas to the focused tab.

use serde::{Deserialize, Serialize};

/// Mouse button carried by mouse events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    /// Left (primary) button
    Left,
    /// Middle button / wheel click
    Middle,
    /// Right (secondary) button
    Right,
    /// Browser back button
    Back,
    /// Browser forward button
    Forward,
}

/// A single input event dispatched to the focused tab.
///
/// The wire tags and field names match what the client canvas emits from the
/// corresponding DOM events, so the payload can be forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    Wheel {
        #[serde(rename = "deltaX")]
        delta_x: f64,
        #[serde(rename = "deltaY")]
        delta_y: f64,
    },
    KeyDown {
        key: String,
    },
    KeyUp {
        key: String,
    },
    MouseDown {
        x: f64,
        y: f64,
        button: MouseButton,
    },
    MouseUp {
        x: f64,
        y: f64,
        button: MouseButton,
    },
    MouseMove {
        x: f64,
        y: f64,
        button: MouseButton,
    },
    TouchStart {
        x: f64,
        y: f64,
    },
    TouchMove {
        x: f64,
        y: f64,
    },
    /// Emitted with no coordinates: the touch list is empty by the time the
    /// end event fires.
    TouchEnd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_event_uses_dom_field_names() {
        let event = InputEvent::Wheel {
            delta_x: 3.0,
            delta_y: -120.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "wheel");
        assert_eq!(json["deltaX"], 3.0);
        assert_eq!(json["deltaY"], -120.0);
    }

    #[test]
    fn mouse_event_roundtrip() {
        let json = r#"{"type":"mousedown","x":10.5,"y":20.0,"button":"left"}"#;
        let event: InputEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            InputEvent::MouseDown {
                x: 10.5,
                y: 20.0,
                button: MouseButton::Left,
            }
        );
    }

    #[test]
    fn touchend_has_no_payload() {
        let event: InputEvent = serde_json::from_str(r#"{"type":"touchend"}"#).unwrap();
        assert_eq!(event, InputEvent::TouchEnd);
    }

    #[test]
    fn key_events_distinguish_direction() {
        let down: InputEvent = serde_json::from_str(r#"{"type":"keydown","key":"a"}"#).unwrap();
        let up: InputEvent = serde_json::from_str(r#"{"type":"keyup","key":"a"}"#).unwrap();
        assert!(matches!(down, InputEvent::KeyDown { .. }));
        assert!(matches!(up, InputEvent::KeyUp { .. }));
    }
}
