//! Client session driver.
//!
//! The protocol-driving half of a session client: connection state machine,
//! tab mirror, session restore replay, and address-bar input resolution.
//! Rendering frames and the tab strip is the embedder's job; this crate
//! hands it [`DriverEvent`]s and accepts [`UiCommand`]s.

pub mod address;
pub mod driver;
pub mod mirror;
pub mod transport;

pub use address::rewrite_address;
pub use driver::{Driver, DriverEvent, DriverState};
pub use mirror::{TabEntry, TabMirror};
pub use transport::{UiCommand, run_session};
