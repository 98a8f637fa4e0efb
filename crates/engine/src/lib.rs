//! Render engine adapter interface.
//!
//! The actual page rendering (navigation, DOM, script execution, input
//! injection, screenshot capture) happens in an external browser engine.
//! This crate defines the capability surface the tab controller consumes:
//! [`RenderEngine`] owns one engine instance, [`PageHandle`] drives one page.
//!
//! All calls are asynchronous and may stall on a wedged page; callers bound
//! them with the timeout constants below and treat failures as transient.

mod error;
pub mod stub;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use vitrine_protocol::InputEvent;

pub use error::{Error, Result};

/// Upper bound for navigation-class operations (navigate, back, forward,
/// reload).
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for everything else against the engine.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for the same-origin favicon fetch.
pub const FAVICON_TIMEOUT: Duration = Duration::from_secs(3);

/// Explicit launch configuration for one engine instance.
///
/// This is the complete set of knobs the worker passes down; the engine must
/// not read anything else from its environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed viewport width in pixels.
    pub width: u32,
    /// Fixed viewport height in pixels.
    pub height: u32,
    /// Whether pages see a touch-capable device.
    pub touch: bool,
    /// Session-private profile directory. Owned exclusively by this engine
    /// instance for its lifetime.
    pub profile_dir: PathBuf,
}

/// Events a page originates on its own, independent of any command.
pub enum PageEvent {
    /// The page finished loading a document.
    Loaded,
    /// The page was closed engine-side.
    Closed,
    /// The page spawned a popup; the handle is already open.
    Popup(Arc<dyn PageHandle>),
}

impl std::fmt::Debug for PageEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageEvent::Loaded => write!(f, "Loaded"),
            PageEvent::Closed => write!(f, "Closed"),
            PageEvent::Popup(_) => write!(f, "Popup(..)"),
        }
    }
}

/// One engine instance: a browser process rendering pages for one session.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Opens a new blank page.
    async fn open_page(&self) -> Result<Arc<dyn PageHandle>>;

    /// Shuts the engine down, closing all pages.
    async fn close(&self) -> Result<()>;
}

/// One page owned by an engine instance.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigates to `url`, resolving once the document loads.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// History back, if any.
    async fn go_back(&self) -> Result<()>;

    /// History forward, if any.
    async fn go_forward(&self) -> Result<()>;

    /// Reloads the current document.
    async fn reload(&self) -> Result<()>;

    /// Closes the page. A [`PageEvent::Closed`] follows on the event stream.
    async fn close(&self) -> Result<()>;

    /// Dispatches one input event into the page.
    async fn inject_input(&self, event: &InputEvent) -> Result<()>;

    /// Captures the current pixels as an opaque compressed image.
    async fn capture_frame(&self) -> Result<Vec<u8>>;

    /// The page's current URL.
    async fn current_url(&self) -> Result<String>;

    /// The page's current title.
    async fn title(&self) -> Result<String>;

    /// The page's declared icon link resolved against the document base,
    /// falling back to `/favicon.ico`.
    async fn icon_url(&self) -> Result<String>;

    /// Takes the page's event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PageEvent>>;
}

/// Launches the engine backend for the given configuration.
///
/// Integration seam for a real browser engine. The default build wires the
/// in-process [`stub`] backend, which renders placeholder frames and records
/// commands; it keeps the full session pipeline runnable without an engine
/// installation.
pub async fn launch(config: EngineConfig) -> Result<Arc<dyn RenderEngine>> {
    Ok(stub::StubEngine::launch(config))
}
