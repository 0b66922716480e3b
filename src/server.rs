//! Server assembly: transport, dispatcher, worker, and the single-writer
//! output task.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::codec::{FrameReader, FrameWriter};
use crate::dispatch::{Dispatcher, Flow};
use crate::worker;
use crate::workspace::{EditQueue, OpenDocuments, SharedWorkspace};

const OUTGOING_CHANNEL_CAPACITY: usize = 64;

/// Run the server over the given transport until the client sends `exit` or
/// the input stream ends. Both the dispatcher and the worker feed a single
/// writer task, so every outgoing frame is one uninterleaved write.
pub async fn run<R, W>(input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let store = SharedWorkspace::new();
    let (queue, signal_rx) = EditQueue::new();
    let open_docs = Arc::new(OpenDocuments::default());
    let (root_tx, root_rx) = oneshot::channel();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTGOING_CHANNEL_CAPACITY);

    let writer_task = tokio::spawn(async move {
        let mut writer = FrameWriter::new(output);
        while let Some(body) = out_rx.recv().await {
            if let Err(err) = writer.write_frame(&body).await {
                tracing::warn!(%err, "output write failed, writer task stopping");
                break;
            }
        }
    });

    // The worker must be waiting on the root channel before the first frame
    // is read, so initialize can never race it.
    let mut worker_task = tokio::spawn(worker::run(
        store.clone(),
        queue.clone(),
        signal_rx,
        root_rx,
        out_tx.clone(),
    ));

    let mut dispatcher = Dispatcher::new(store, queue, open_docs, root_tx, out_tx);
    let mut reader = FrameReader::new(input);

    let result = loop {
        tokio::select! {
            frame = reader.read_frame() => match frame {
                Ok(Some(body)) => match dispatcher.dispatch(&body).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Exit) => break Ok(()),
                    Err(err) => break Err(err),
                },
                Ok(None) => {
                    tracing::info!("input stream closed, shutting down");
                    break Ok(());
                }
                Err(err) => break Err(err).context("reading LSP input stream"),
            },
            joined = &mut worker_task => {
                break match joined {
                    Ok(()) => Err(anyhow!("analysis worker exited unexpectedly")),
                    Err(err) => Err(anyhow!("analysis worker aborted: {err}")),
                };
            }
        }
    };

    // Tear-down: the worker dies with the session; dropping the dispatcher
    // releases the last outgoing sender so the writer drains and stops.
    worker_task.abort();
    drop(dispatcher);
    let _ = writer_task.await;

    result
}
