//! Wire types for the vitrine session protocol.
//!
//! Two message directions exist: [`ClientMessage`] flows from the client
//! transport toward the worker, [`WorkerMessage`] flows back. Both are
//! internally tagged JSON so every message kind is handled exhaustively at
//! compile time. The [`pipe`] module provides the length-prefixed framing
//! used between the session supervisor and its worker process.

mod error;
mod input;
mod messages;
pub mod pipe;

pub use error::{Error, Result};
pub use input::{InputEvent, MouseButton};
pub use messages::{
    ClientMessage, SessionOptions, VIEWPORT_MAX, VIEWPORT_MIN, WorkerMessage, clamp_viewport,
};

/// Serde helper for byte payloads carried as base64 strings inside JSON.
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
