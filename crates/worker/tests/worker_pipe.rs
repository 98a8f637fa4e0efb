//! End-to-end test of the worker binary over its stdio pipe.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use vitrine_protocol::{ClientMessage, WorkerMessage, pipe};

async fn next_message(stdout: &mut tokio::process::ChildStdout) -> WorkerMessage {
    let text = pipe::read_frame(stdout)
        .await
        .expect("pipe read failed")
        .expect("worker closed the pipe early");
    serde_json::from_str(&text).expect("unparseable worker message")
}

/// Reads messages until one matches, skipping interleaved video frames.
async fn wait_for(
    stdout: &mut tokio::process::ChildStdout,
    mut pred: impl FnMut(&WorkerMessage) -> bool,
) -> WorkerMessage {
    timeout(Duration::from_secs(5), async {
        loop {
            let msg = next_message(stdout).await;
            if pred(&msg) {
                return msg;
            }
        }
    })
    .await
    .expect("expected message never arrived")
}

#[tokio::test]
async fn worker_speaks_the_pipe_protocol_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let data_dir = root.path().join("session");
    tokio::fs::create_dir_all(&data_dir).await.unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_vitrine-worker"))
        .arg("--width")
        .arg("800")
        .arg("--height")
        .arg("5000")
        .arg("--data-dir")
        .arg(&data_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    // The first message is ready, with the oversize height clamped.
    let ready = timeout(Duration::from_secs(10), next_message(&mut stdout))
        .await
        .expect("no ready message");
    assert_eq!(
        ready,
        WorkerMessage::Ready {
            width: 800,
            height: 1280,
        }
    );

    let newtab = serde_json::to_string(&ClientMessage::NewTab { url: None }).unwrap();
    pipe::write_frame(&mut stdin, &newtab).await.unwrap();

    let opened = wait_for(&mut stdout, |msg| {
        matches!(msg, WorkerMessage::TabOpen { .. })
    })
    .await;
    assert_eq!(opened, WorkerMessage::TabOpen { index: 0 });

    // With a focused tab, frames flow on the capture cadence.
    wait_for(&mut stdout, |msg| matches!(msg, WorkerMessage::Frame { .. })).await;

    let stop = serde_json::to_string(&ClientMessage::Stop).unwrap();
    pipe::write_frame(&mut stdin, &stop).await.unwrap();

    let status = timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("worker did not exit after stop")
        .unwrap();
    assert!(status.success());
    assert!(!data_dir.exists(), "worker left its data dir behind");
}
