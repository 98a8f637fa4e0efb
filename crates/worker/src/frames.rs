//! Fixed-cadence frame-capture loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::debug;
use vitrine_engine::DEFAULT_TIMEOUT;
use vitrine_protocol::WorkerMessage;

use crate::controller::FocusCell;

/// Capture cadence. The loop fires on this period regardless of how long a
/// capture takes or whether it succeeds.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Frame sent when capture fails, so the client stream never stalls.
pub const PLACEHOLDER_FRAME: &[u8] = include_bytes!("../res/loading.jpg");

/// Spawns the capture loop as an independent recurring task.
///
/// Each tick snapshots the focused page, captures it (bounded by the default
/// timeout), and emits a frame message; capture failure emits the
/// placeholder. With no focused tab the tick is skipped. The loop never
/// handles commands, so a slow capture cannot block the command queue; the
/// caller aborts the returned handle the moment the session shuts down.
pub fn spawn_frame_loop(
    focus: FocusCell,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(FRAME_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(page) = focus.lock().clone() else {
                continue;
            };

            let data = match timeout(DEFAULT_TIMEOUT, page.capture_frame()).await {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(err)) => {
                    debug!(target = "vitrine", error = %err, "frame capture failed");
                    PLACEHOLDER_FRAME.to_vec()
                }
                Err(_) => {
                    debug!(target = "vitrine", "frame capture timed out");
                    PLACEHOLDER_FRAME.to_vec()
                }
            };

            if outbound.send(WorkerMessage::Frame { data }).is_err() {
                // Outbound pipe is gone; the worker is shutting down.
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use vitrine_engine::stub::StubEngine;
    use vitrine_engine::{EngineConfig, RenderEngine};

    use super::*;

    fn stub_engine() -> Arc<StubEngine> {
        StubEngine::launch(EngineConfig {
            width: 800,
            height: 600,
            touch: false,
            profile_dir: PathBuf::from("/tmp/profile"),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn frames_flow_while_a_tab_is_focused() {
        let engine = stub_engine();
        let page = engine.open_page().await.unwrap();
        let focus: FocusCell = Arc::new(Mutex::new(Some(page)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = spawn_frame_loop(focus, tx);

        for _ in 0..3 {
            match rx.recv().await {
                Some(WorkerMessage::Frame { data }) => assert!(!data.is_empty()),
                other => panic!("expected frame, got {other:?}"),
            }
        }
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_emits_the_placeholder() {
        let engine = stub_engine();
        let page = engine.open_page().await.unwrap();
        engine.pages()[0].script_capture_failure(true);

        let focus: FocusCell = Arc::new(Mutex::new(Some(page)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_frame_loop(focus, tx);

        match rx.recv().await {
            Some(WorkerMessage::Frame { data }) => assert_eq!(data, PLACEHOLDER_FRAME),
            other => panic!("expected placeholder frame, got {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn no_focused_tab_means_no_frames() {
        let focus: FocusCell = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_frame_loop(focus, tx);

        // Give the loop several ticks; nothing may arrive.
        tokio::time::sleep(FRAME_INTERVAL * 5).await;
        assert!(rx.try_recv().is_err());
        handle.abort();
    }

    #[test]
    fn placeholder_is_a_jpeg() {
        assert_eq!(&PLACEHOLDER_FRAME[..3], &[0xff, 0xd8, 0xff]);
    }
}
