//! In-process stub backend.
//!
//! Stands in for a real browser engine: pages record the commands they
//! receive, keep a navigable history, and render placeholder frames. Worker
//! tests script titles, icon URLs, failures, and page-originated events
//! through the `script_*` methods.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use vitrine_protocol::InputEvent;

use crate::{EngineConfig, Error, PageEvent, PageHandle, RenderEngine, Result};

/// Minimal JPEG header used for placeholder frame payloads.
const FRAME_MAGIC: [u8; 3] = [0xff, 0xd8, 0xff];

/// Stub engine instance.
pub struct StubEngine {
    config: EngineConfig,
    pages: Mutex<Vec<Arc<StubPage>>>,
    next_page_id: AtomicU64,
    closed: AtomicBool,
    fail_open: AtomicBool,
}

impl StubEngine {
    /// Creates a running stub engine.
    pub fn launch(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            pages: Mutex::new(Vec::new()),
            next_page_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
        })
    }

    /// The configuration this engine was launched with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Scripts the next `open_page` calls to fail.
    pub fn script_open_failure(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Opens a page and delivers it as a popup spawned by `from`.
    pub fn script_popup(&self, from: &StubPage) -> Arc<StubPage> {
        let page = self.new_page();
        from.emit(PageEvent::Popup(page.clone()));
        page
    }

    /// Pages opened so far, including closed ones.
    pub fn pages(&self) -> Vec<Arc<StubPage>> {
        self.pages.lock().clone()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn new_page(&self) -> Arc<StubPage> {
        let id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        let page = Arc::new(StubPage::new(id));
        self.pages.lock().push(page.clone());
        page
    }
}

#[async_trait]
impl RenderEngine for StubEngine {
    async fn open_page(&self) -> Result<Arc<dyn PageHandle>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TargetClosed("engine".into()));
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Protocol("scripted open_page failure".into()));
        }
        Ok(self.new_page())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        for page in self.pages.lock().iter() {
            page.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Stub page: records commands, keeps history, emits scripted events.
pub struct StubPage {
    id: u64,
    /// History entries plus the cursor into them.
    history: Mutex<(Vec<String>, usize)>,
    title: Mutex<String>,
    icon_url: Mutex<String>,
    navigations: Mutex<Vec<String>>,
    inputs: Mutex<Vec<InputEvent>>,
    closed: AtomicBool,
    fail_capture: AtomicBool,
    fail_navigation: AtomicBool,
    frame_counter: AtomicU64,
    events_tx: mpsc::UnboundedSender<PageEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PageEvent>>>,
}

impl StubPage {
    fn new(id: u64) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id,
            history: Mutex::new((vec!["about:blank".to_string()], 0)),
            title: Mutex::new(String::new()),
            icon_url: Mutex::new(String::new()),
            navigations: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_capture: AtomicBool::new(false),
            fail_navigation: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Stable id of this page within its engine.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Scripts the title reported by `title()` and future load events.
    pub fn script_title(&self, title: &str) {
        *self.title.lock() = title.to_string();
    }

    /// Scripts the icon URL reported by `icon_url()`.
    pub fn script_icon_url(&self, url: &str) {
        *self.icon_url.lock() = url.to_string();
    }

    /// Scripts capture failures.
    pub fn script_capture_failure(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }

    /// Scripts navigation-class failures (navigate/back/forward/reload).
    pub fn script_navigation_failure(&self, fail: bool) {
        self.fail_navigation.store(fail, Ordering::SeqCst);
    }

    /// Emits a page event, as the engine would.
    pub fn emit(&self, event: PageEvent) {
        let _ = self.events_tx.send(event);
    }

    /// URLs passed to `navigate` so far.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }

    /// Input events injected so far.
    pub fn inputs(&self) -> Vec<InputEvent> {
        self.inputs.lock().clone()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TargetClosed(format!("page {}", self.id)));
        }
        Ok(())
    }

    fn ensure_navigable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.fail_navigation.load(Ordering::SeqCst) {
            return Err(Error::Timeout("scripted navigation failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PageHandle for StubPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.ensure_navigable()?;
        self.navigations.lock().push(url.to_string());
        {
            let mut history = self.history.lock();
            let pos = history.1;
            history.0.truncate(pos + 1);
            history.0.push(url.to_string());
            history.1 += 1;
        }
        self.emit(PageEvent::Loaded);
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.ensure_navigable()?;
        let mut history = self.history.lock();
        if history.1 > 0 {
            history.1 -= 1;
            drop(history);
            self.emit(PageEvent::Loaded);
        }
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        self.ensure_navigable()?;
        let mut history = self.history.lock();
        if history.1 + 1 < history.0.len() {
            history.1 += 1;
            drop(history);
            self.emit(PageEvent::Loaded);
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.ensure_navigable()?;
        self.emit(PageEvent::Loaded);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(PageEvent::Closed);
        }
        Ok(())
    }

    async fn inject_input(&self, event: &InputEvent) -> Result<()> {
        self.ensure_open()?;
        self.inputs.lock().push(event.clone());
        Ok(())
    }

    async fn capture_frame(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(Error::Protocol("scripted capture failure".into()));
        }
        let n = self.frame_counter.fetch_add(1, Ordering::SeqCst);
        let mut frame = FRAME_MAGIC.to_vec();
        frame.extend_from_slice(&n.to_le_bytes());
        Ok(frame)
    }

    async fn current_url(&self) -> Result<String> {
        self.ensure_open()?;
        let history = self.history.lock();
        Ok(history.0[history.1].clone())
    }

    async fn title(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.title.lock().clone())
    }

    async fn icon_url(&self) -> Result<String> {
        self.ensure_open()?;
        let scripted = self.icon_url.lock().clone();
        if !scripted.is_empty() {
            return Ok(scripted);
        }
        Ok(default_icon_url(&self.current_url().await?))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PageEvent>> {
        self.events_rx.lock().take()
    }
}

/// `/favicon.ico` at the page's origin, or empty for non-http(s) documents.
fn default_icon_url(url: &str) -> String {
    let rest = match url.split_once("://") {
        Some(("http" | "https", rest)) => rest,
        _ => return String::new(),
    };
    let host = rest.split('/').next().unwrap_or(rest);
    if host.is_empty() {
        return String::new();
    }
    let scheme = &url[..url.find(':').unwrap_or(0)];
    format!("{scheme}://{host}/favicon.ico")
}
