//! Session server: WebSocket gateway plus per-session worker supervision.
//!
//! The gateway accepts client connections and validates session control
//! messages; everything else is relayed verbatim to a per-session worker
//! process supervised by [`supervisor::Session`].

pub mod cli;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod supervisor;
