//! Tab controller: the ordered tab sequence and focused-tab pointer.

use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;
use vitrine_engine::{DEFAULT_TIMEOUT, NAVIGATION_TIMEOUT, PageEvent, PageHandle, RenderEngine};
use vitrine_protocol::{ClientMessage, WorkerMessage};

use crate::favicon;
use crate::filter::check_rewrite_url;

/// Shared pointer to the focused tab's page, read by the frame loop.
pub type FocusCell = Arc<Mutex<Option<Arc<dyn PageHandle>>>>;

/// Stable identity of a tab, independent of its position in the sequence.
///
/// The wire protocol is positional (indices compact on close), so engine
/// events are routed by id to survive removals that happen between an
/// event being emitted and being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabId(u64);

struct Tab {
    id: TabId,
    page: Arc<dyn PageHandle>,
}

#[derive(Clone, Copy)]
enum HistoryOp {
    Back,
    Forward,
    Refresh,
}

/// Runs an engine call under a timeout, logging instead of propagating.
async fn swallow<F>(what: &str, limit: std::time::Duration, fut: F)
where
    F: std::future::Future<Output = vitrine_engine::Result<()>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(target = "vitrine", error = %err, "{what} failed"),
        Err(_) => debug!(target = "vitrine", "{what} timed out"),
    }
}

/// Owns the tab sequence of one session.
///
/// Commands and page events are handled one at a time on the task driving
/// [`TabController::run`]; every engine call is bounded by a timeout and its
/// failure swallowed, so a wedged page never takes the controller down.
pub struct TabController {
    engine: Arc<dyn RenderEngine>,
    tabs: Vec<Tab>,
    focused: Option<usize>,
    focus: FocusCell,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    page_events_tx: mpsc::UnboundedSender<(TabId, PageEvent)>,
    next_tab_id: u64,
    http: reqwest::Client,
}

impl TabController {
    /// Creates a controller plus the page-event stream its tabs feed.
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        outbound: mpsc::UnboundedSender<WorkerMessage>,
        http: reqwest::Client,
    ) -> (Self, mpsc::UnboundedReceiver<(TabId, PageEvent)>) {
        let (page_events_tx, page_events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            engine,
            tabs: Vec::new(),
            focused: None,
            focus: Arc::new(Mutex::new(None)),
            outbound,
            page_events_tx,
            next_tab_id: 0,
            http,
        };
        (controller, page_events_rx)
    }

    /// The cell the frame loop snapshots the focused page from.
    pub fn focus_cell(&self) -> FocusCell {
        self.focus.clone()
    }

    /// Index of the focused tab, or `None` when no tabs exist.
    pub fn focused_index(&self) -> Option<usize> {
        self.focused
    }

    /// Number of open tabs.
    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    /// Drives the controller until a `stop` command arrives or the command
    /// stream closes (the supervisor went away).
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ClientMessage>,
        mut page_events: mpsc::UnboundedReceiver<(TabId, PageEvent)>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await.is_break() {
                            break;
                        }
                    }
                    None => break,
                },
                Some((id, event)) = page_events.recv() => {
                    self.handle_page_event(id, event).await;
                }
            }
        }
    }

    /// Applies one relayed command. `Break` means graceful shutdown.
    pub async fn handle_command(&mut self, cmd: ClientMessage) -> ControlFlow<()> {
        match cmd {
            ClientMessage::Stop => return ControlFlow::Break(()),
            ClientMessage::OpenSession(_) | ClientMessage::EndSession => {
                // Session control belongs to the gateway; a verbatim relay
                // can still deliver these from a misbehaving client.
                debug!(target = "vitrine", "ignoring session control message in worker");
            }
            ClientMessage::NewTab { url } => self.new_tab(url.as_deref()).await,
            ClientMessage::Navigate { url } => {
                let Some(page) = self.focused_page() else {
                    return ControlFlow::Continue(());
                };
                let Some(target) = check_rewrite_url(&url) else {
                    return ControlFlow::Continue(());
                };
                swallow("navigate", NAVIGATION_TIMEOUT, page.navigate(&target)).await;
            }
            ClientMessage::Back => self.history_op(HistoryOp::Back).await,
            ClientMessage::Forward => self.history_op(HistoryOp::Forward).await,
            ClientMessage::Refresh => self.history_op(HistoryOp::Refresh).await,
            ClientMessage::FocusTab { index } => {
                if index < self.tabs.len() {
                    self.set_focus(Some(index));
                }
            }
            ClientMessage::CloseTab { index } => {
                // Removal and focus adjustment happen on the page's Closed
                // event, the same path as engine-initiated closes.
                if let Some(tab) = self.tabs.get(index) {
                    let page = tab.page.clone();
                    swallow("tab close", DEFAULT_TIMEOUT, page.close()).await;
                }
            }
            ClientMessage::Event { event } => {
                let Some(page) = self.focused_page() else {
                    return ControlFlow::Continue(());
                };
                swallow("input dispatch", DEFAULT_TIMEOUT, page.inject_input(&event)).await;
            }
        }
        ControlFlow::Continue(())
    }

    /// Applies one page-originated engine event.
    pub async fn handle_page_event(&mut self, id: TabId, event: PageEvent) {
        match event {
            PageEvent::Loaded => self.page_loaded(id).await,
            PageEvent::Closed => self.remove_tab(id),
            PageEvent::Popup(page) => {
                // Auto-open and focus a tab for the spawned page.
                self.register_tab(page).await;
            }
        }
    }

    async fn new_tab(&mut self, url: Option<&str>) {
        let page = match timeout(DEFAULT_TIMEOUT, self.engine.open_page()).await {
            Ok(Ok(page)) => page,
            Ok(Err(err)) => {
                debug!(target = "vitrine", error = %err, "open_page failed");
                return;
            }
            Err(_) => {
                debug!(target = "vitrine", "open_page timed out");
                return;
            }
        };

        self.register_tab(page.clone()).await;

        // Navigation failures leave the tab open and blank.
        if let Some(target) = url.and_then(check_rewrite_url) {
            swallow("initial navigation", NAVIGATION_TIMEOUT, page.navigate(&target)).await;
        }
    }

    /// Appends `page` to the sequence, focuses it, and announces it.
    async fn register_tab(&mut self, page: Arc<dyn PageHandle>) {
        let id = TabId(self.next_tab_id);
        self.next_tab_id += 1;

        if let Some(mut events) = page.take_events() {
            let tx = self.page_events_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if tx.send((id, event)).is_err() {
                        break;
                    }
                }
            });
        }

        self.tabs.push(Tab {
            id,
            page: page.clone(),
        });
        let index = self.tabs.len() - 1;
        self.set_focus(Some(index));
        self.send(WorkerMessage::TabOpen { index });

        let url = match timeout(DEFAULT_TIMEOUT, page.current_url()).await {
            Ok(Ok(url)) => url,
            _ => String::new(),
        };
        self.send(WorkerMessage::Url { url });
    }

    async fn page_loaded(&mut self, id: TabId) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        let page = self.tabs[index].page.clone();

        let title = match timeout(DEFAULT_TIMEOUT, page.title()).await {
            Ok(Ok(title)) => title,
            _ => String::new(),
        };
        let favicon = favicon::resolve(&self.http, &page).await;

        // The tab may have moved or closed while we were fetching.
        let Some(index) = self.index_of(id) else {
            return;
        };

        if self.focused == Some(index) {
            let url = match timeout(DEFAULT_TIMEOUT, page.current_url()).await {
                Ok(Ok(url)) => url,
                _ => String::new(),
            };
            self.send(WorkerMessage::Url { url });
        }
        self.send(WorkerMessage::TabInfo {
            index,
            title,
            favicon,
        });
    }

    fn remove_tab(&mut self, id: TabId) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        self.tabs.remove(index);
        self.send(WorkerMessage::TabClose { index });

        let new_focus = match self.focused {
            _ if self.tabs.is_empty() => None,
            Some(f) if f == index => Some(index.saturating_sub(1).min(self.tabs.len() - 1)),
            // A removal below the pointer shifts it down so it keeps naming
            // the same tab.
            Some(f) if f > index => Some(f - 1),
            other => other,
        };
        self.set_focus(new_focus);
    }

    async fn history_op(&mut self, op: HistoryOp) {
        let Some(page) = self.focused_page() else {
            return;
        };
        let fut = async {
            match op {
                HistoryOp::Back => page.go_back().await,
                HistoryOp::Forward => page.go_forward().await,
                HistoryOp::Refresh => page.reload().await,
            }
        };
        swallow("history traversal", NAVIGATION_TIMEOUT, fut).await;
    }

    fn focused_page(&self) -> Option<Arc<dyn PageHandle>> {
        self.focused.map(|i| self.tabs[i].page.clone())
    }

    fn index_of(&self, id: TabId) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.id == id)
    }

    fn set_focus(&mut self, index: Option<usize>) {
        self.focused = index;
        *self.focus.lock() = self.focused_page();
    }

    fn send(&self, msg: WorkerMessage) {
        let _ = self.outbound.send(msg);
    }
}
