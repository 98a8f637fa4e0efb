//! Per-session rendering worker.
//!
//! One worker process exists per client session. It owns the ordered tab
//! sequence and the focused-tab pointer, filters navigation targets, drives
//! the fixed-cadence frame-capture loop, and translates page-originated
//! engine events into outbound notifications. Commands arrive as
//! [`vitrine_protocol::ClientMessage`] values relayed verbatim from the
//! client transport by the session supervisor.

pub mod controller;
pub mod favicon;
pub mod filter;
pub mod frames;

pub use controller::{FocusCell, TabController};
pub use frames::{FRAME_INTERVAL, PLACEHOLDER_FRAME, spawn_frame_loop};
