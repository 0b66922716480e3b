//! Decodes incoming envelopes and routes them to method handlers.
//!
//! Malformed JSON skips the frame; handler invariant violations abort the
//! process. After `shutdown`, every method except `exit` is answered with a
//! protocol error.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};

use crate::handlers::{self, HandlerError};
use crate::protocol::{Envelope, ErrorResponse, INVALID_REQUEST, METHOD_NOT_FOUND};
use crate::session::Session;
use crate::workspace::{EditQueue, OpenDocuments, SharedWorkspace};

/// What the main loop should do after a frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Dispatcher {
    store: SharedWorkspace,
    queue: Arc<EditQueue>,
    open_docs: Arc<OpenDocuments>,
    /// Consumed by the first `initialize`; a second one finds it gone.
    root_tx: Option<oneshot::Sender<String>>,
    outgoing: mpsc::Sender<Vec<u8>>,
    session: Session,
}

impl Dispatcher {
    pub fn new(
        store: SharedWorkspace,
        queue: Arc<EditQueue>,
        open_docs: Arc<OpenDocuments>,
        root_tx: oneshot::Sender<String>,
        outgoing: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            store,
            queue,
            open_docs,
            root_tx: Some(root_tx),
            outgoing,
            session: Session::new(),
        }
    }

    pub async fn dispatch(&mut self, frame: &[u8]) -> Result<Flow> {
        let envelope: Envelope = match serde_json::from_slice(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(%err, "skipping frame with malformed JSON-RPC envelope");
                return Ok(Flow::Continue);
            }
        };

        let Some(method) = envelope.method else {
            tracing::debug!("ignoring frame without a method");
            return Ok(Flow::Continue);
        };
        self.session.observe(&method);

        if self.session.is_shutting_down() {
            if method == "exit" {
                tracing::info!(counters = ?self.session.counters(), "exit received, leaving main loop");
                return Ok(Flow::Exit);
            }
            let response = ErrorResponse::new(
                envelope.id,
                INVALID_REQUEST,
                "illegal request while server shutting down",
            );
            self.send(serde_json::to_vec(&response).context("marshalling shutdown-phase error")?)
                .await?;
            return Ok(Flow::Continue);
        }

        let outcome = match method.as_str() {
            "initialize" => handlers::initialize(frame, &mut self.root_tx, &mut self.session),
            "initialized" => handlers::initialized(),
            "shutdown" => handlers::shutdown(frame, &mut self.session),
            "exit" => {
                tracing::info!(counters = ?self.session.counters(), "exit received, leaving main loop");
                return Ok(Flow::Exit);
            }
            "textDocument/didOpen" => handlers::did_open(frame, &self.queue, &self.open_docs),
            "textDocument/didChange" => handlers::did_change(frame, &self.queue),
            "textDocument/didClose" => handlers::did_close(frame, &self.open_docs),
            "textDocument/hover" => handlers::hover(frame, &self.store, &self.open_docs),
            "textDocument/definition" => {
                handlers::definition(frame, &self.store, &self.open_docs)
            }
            "textDocument/foldingRange" => {
                handlers::folding_range(frame, &self.store, &self.queue)
            }
            _ => {
                match envelope.id {
                    // Unknown request: the client is waiting, answer it.
                    Some(id) => {
                        let response = ErrorResponse::new(
                            Some(id),
                            METHOD_NOT_FOUND,
                            format!("method not found: {method}"),
                        );
                        self.send(
                            serde_json::to_vec(&response)
                                .context("marshalling method-not-found error")?,
                        )
                        .await?;
                    }
                    None => tracing::debug!(%method, "ignoring unknown notification"),
                }
                return Ok(Flow::Continue);
            }
        };

        match outcome {
            Ok(Some(body)) => self.send(body).await?,
            Ok(None) => {}
            Err(HandlerError::Client(reason)) => {
                tracing::warn!(%method, %reason, "dropping unserviceable client message");
            }
            Err(HandlerError::Invariant(reason)) => {
                tracing::error!(
                    %method,
                    %reason,
                    frame = %String::from_utf8_lossy(frame),
                    "invariant violation while handling request"
                );
                panic!("invariant violation in {method}: {reason}");
            }
        }

        Ok(Flow::Continue)
    }

    async fn send(&self, body: Vec<u8>) -> Result<()> {
        self.outgoing
            .send(body)
            .await
            .map_err(|_| anyhow::anyhow!("output channel closed"))
    }
}
