//! Runs a worker as a child process: control messages arrive as JSON lines on stdin,
//! events leave as JSON lines on stdout. Logs go to stderr.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::{decode_line, encode_line, ControlMessage, WorkerEvent};
use crate::worker::SamplingWorker;

const CHANNEL_DEPTH: usize = 32;

pub async fn serve_stdio(worker: SamplingWorker) -> anyhow::Result<()> {
    let (control_tx, control_rx) = mpsc::channel::<ControlMessage>(CHANNEL_DEPTH);
    let (event_tx, mut event_rx) = mpsc::channel::<WorkerEvent>(CHANNEL_DEPTH);

    // stdin -> control. EOF drops control_tx, which ends the worker.
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match decode_line::<ControlMessage>(&line) {
                Ok(msg) => {
                    if control_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("ignoring malformed control message: {e:#}"),
            }
        }
    });

    // events -> stdout
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(ev) = event_rx.recv().await {
            let line = encode_line(&ev)?;
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    worker.run(control_rx, event_tx).await;
    reader.abort();
    // worker dropped its sender; the writer drains and finishes
    writer.await??;
    Ok(())
}
