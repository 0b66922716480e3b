//! One handler per LSP method.
//!
//! Handlers take the raw frame bytes plus the shared state they need, and
//! return an optional response body. They are stateless apart from workspace
//! reads; all mutation funnels through the edit inbox.

use serde::Serialize;
use tokio::sync::oneshot;

use crate::protocol::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    FoldingRange, FoldingRangeParams, Hover, Incoming, InitializeParams, InitializeResult,
    Location, MarkupContent, Position, Range, RequestId, Response, ServerCapabilities, ServerInfo,
    TextDocumentPositionParams,
};
use crate::session::Session;
use crate::uri;
use crate::workspace::{EditQueue, OpenDocuments, SharedWorkspace};
use crate::{SERVER_NAME, SERVER_VERSION};

/// Full-document sync, the only mode the server advertises.
const TEXT_DOCUMENT_SYNC_FULL: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A malformed or unserviceable client message; logged and dropped.
    #[error("{0}")]
    Client(String),
    /// A broken server-side assumption; the process aborts.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

pub type HandlerResult = Result<Option<Vec<u8>>, HandlerError>;

fn marshal<T: Serialize>(value: &T) -> Result<Vec<u8>, HandlerError> {
    serde_json::to_vec(value)
        .map_err(|err| HandlerError::Invariant(format!("marshalling response: {err}")))
}

fn null_response(id: RequestId) -> Result<Vec<u8>, HandlerError> {
    marshal(&Response::new(id, ()))
}

/// Decode `frame` as a request carrying `P` params. Decode failures on
/// lifecycle and sync notifications are invariants (the client library
/// produced them); feature requests use [`decode_lenient`] instead.
fn decode<P: serde::de::DeserializeOwned>(
    frame: &[u8],
    method: &str,
) -> Result<Incoming<P>, HandlerError> {
    serde_json::from_slice(frame)
        .map_err(|err| HandlerError::Invariant(format!("unmarshalling {method} message: {err}")))
}

fn decode_lenient<P: serde::de::DeserializeOwned>(
    frame: &[u8],
    method: &str,
) -> Result<Incoming<P>, HandlerError> {
    serde_json::from_slice(frame)
        .map_err(|err| HandlerError::Client(format!("unmarshalling {method} message: {err}")))
}

pub fn initialize(
    frame: &[u8],
    root_tx: &mut Option<oneshot::Sender<String>>,
    session: &mut Session,
) -> HandlerResult {
    let request: Incoming<InitializeParams> = decode(frame, "initialize")?;
    let id = request.id.unwrap_or(RequestId(0));
    let params = request.params.unwrap_or_default();

    if let Some(client) = &params.client_info {
        tracing::info!(
            client = client.name,
            version = client.version.as_deref().unwrap_or("unknown"),
            "initialize received"
        );
    }

    let count = session.initialized();
    match root_tx.take() {
        Some(tx) => {
            let raw_root = params.root_uri.filter(|uri| !uri.is_empty()).ok_or_else(|| {
                HandlerError::Invariant(
                    "initialize carried no rootUri; cannot analyze a workspace".to_string(),
                )
            })?;
            let root = uri::decode_uri(&raw_root);
            tx.send(root).map_err(|_| {
                HandlerError::Invariant(
                    "analysis worker dropped the workspace root channel".to_string(),
                )
            })?;
        }
        None => {
            tracing::warn!(
                count,
                "repeat initialize; workspace root already handed to the analysis worker"
            );
        }
    }

    let result = InitializeResult {
        capabilities: ServerCapabilities {
            text_document_sync: TEXT_DOCUMENT_SYNC_FULL,
            hover_provider: true,
            definition_provider: true,
            folding_range_provider: true,
        },
        server_info: ServerInfo {
            name: SERVER_NAME,
            version: SERVER_VERSION,
        },
    };
    Ok(Some(marshal(&Response::new(id, result))?))
}

pub fn initialized() -> HandlerResult {
    tracing::info!("client completed the initialization handshake");
    Ok(None)
}

pub fn shutdown(frame: &[u8], session: &mut Session) -> HandlerResult {
    let request: Incoming<serde_json::Value> = decode(frame, "shutdown")?;
    let id = request.id.unwrap_or(RequestId(0));
    session.begin_shutdown();
    tracing::info!(counters = ?session.counters(), "shutdown requested");
    Ok(Some(null_response(id)?))
}

pub fn did_open(frame: &[u8], queue: &EditQueue, open_docs: &OpenDocuments) -> HandlerResult {
    let request: Incoming<DidOpenTextDocumentParams> = decode(frame, "textDocument/didOpen")?;
    let params = request
        .params
        .ok_or_else(|| HandlerError::Client("didOpen without params".to_string()))?;

    let uri = uri::decode_uri(&params.text_document.uri);
    tracing::debug!(%uri, bytes = params.text_document.text.len(), "document opened");
    open_docs.open(uri.clone());
    queue.post(uri, params.text_document.text.into_bytes());
    Ok(None)
}

pub fn did_change(frame: &[u8], queue: &EditQueue) -> HandlerResult {
    let request: Incoming<DidChangeTextDocumentParams> = decode(frame, "textDocument/didChange")?;
    let params = request
        .params
        .ok_or_else(|| HandlerError::Client("didChange without params".to_string()))?;

    if params.content_changes.len() > 1 {
        // Full sync was advertised; an incremental payload means the client
        // ignored our capabilities.
        return Err(HandlerError::Invariant(format!(
            "didChange carried {} content changes; only full-document sync is supported",
            params.content_changes.len()
        )));
    }
    let Some(change) = params.content_changes.into_iter().next() else {
        return Err(HandlerError::Client(
            "didChange with empty contentChanges".to_string(),
        ));
    };

    let uri = uri::decode_uri(&params.text_document.uri);
    tracing::debug!(%uri, bytes = change.text.len(), "document changed");
    queue.post(uri, change.text.into_bytes());
    Ok(None)
}

pub fn did_close(frame: &[u8], open_docs: &OpenDocuments) -> HandlerResult {
    let request: Incoming<DidCloseTextDocumentParams> = decode(frame, "textDocument/didClose")?;
    let params = request
        .params
        .ok_or_else(|| HandlerError::Client("didClose without params".to_string()))?;

    let uri = uri::decode_uri(&params.text_document.uri);
    tracing::debug!(%uri, "document closed");
    // The workspace store keeps its entry; only the editor's view changes.
    open_docs.close(&uri);
    Ok(None)
}

/// Look up the analyzed file for a feature request. The client must have
/// opened the document first, so a miss is a server-side inconsistency.
fn require_analyzed<'a>(
    workspace: &'a crate::workspace::Workspace,
    open_docs: &OpenDocuments,
    uri: &str,
    method: &str,
) -> Result<&'a gotmpl_analysis::AnalyzedTemplate, HandlerError> {
    if !open_docs.contains(uri) {
        return Err(HandlerError::Invariant(format!(
            "{method} for {uri} which is not open on the server"
        )));
    }
    workspace.analyzed.get(uri).ok_or_else(|| {
        HandlerError::Invariant(format!(
            "{method} for {uri} which has no analysis result; the file must be open on the server"
        ))
    })
}

pub fn hover(frame: &[u8], store: &SharedWorkspace, open_docs: &OpenDocuments) -> HandlerResult {
    let request: Incoming<TextDocumentPositionParams> =
        decode_lenient(frame, "textDocument/hover")?;
    let id = request.id.unwrap_or(RequestId(0));
    let params = request
        .params
        .ok_or_else(|| HandlerError::Client("hover without params".to_string()))?;

    let uri = uri::decode_uri(&params.text_document.uri);
    let workspace = store.read();
    let analyzed = require_analyzed(&workspace, open_docs, &uri, "hover")?;

    let (markdown, span) = gotmpl_analysis::hover(analyzed, params.position.into());
    if markdown.is_empty() {
        return Ok(Some(null_response(id)?));
    }

    let result = Hover {
        contents: MarkupContent {
            kind: "markdown",
            value: markdown,
        },
        range: span.into(),
    };
    Ok(Some(marshal(&Response::new(id, result))?))
}

pub fn definition(
    frame: &[u8],
    store: &SharedWorkspace,
    open_docs: &OpenDocuments,
) -> HandlerResult {
    let request: Incoming<TextDocumentPositionParams> =
        decode_lenient(frame, "textDocument/definition")?;
    let id = request.id.unwrap_or(RequestId(0));
    let params = request
        .params
        .ok_or_else(|| HandlerError::Client("definition without params".to_string()))?;

    let uri = uri::decode_uri(&params.text_document.uri);
    let workspace = store.read();
    let analyzed = require_analyzed(&workspace, open_docs, &uri, "go-to-definition")?;

    let sites = match gotmpl_analysis::go_to_definition(analyzed, params.position.into()) {
        Ok(sites) => sites,
        Err(err) => {
            tracing::warn!(%uri, %err, "go-to-definition failed");
            return Ok(Some(null_response(id)?));
        }
    };
    if sites.is_empty() {
        return Ok(Some(null_response(id)?));
    }

    let mut locations = Vec::with_capacity(sites.len());
    for site in sites {
        if site.uri.is_empty() {
            return Err(HandlerError::Invariant(format!(
                "go-to-definition from {uri} produced a target with an empty URI"
            )));
        }
        locations.push(Location {
            uri: site.uri,
            range: site.span.into(),
        });
    }
    Ok(Some(marshal(&Response::new(id, locations))?))
}

pub fn folding_range(frame: &[u8], store: &SharedWorkspace, queue: &EditQueue) -> HandlerResult {
    let request: Incoming<FoldingRangeParams> = decode_lenient(frame, "textDocument/foldingRange")?;
    let id = request.id.unwrap_or(RequestId(0));
    let params = request
        .params
        .ok_or_else(|| HandlerError::Client("foldingRange without params".to_string()))?;

    let uri = uri::decode_uri(&params.text_document.uri);

    // Folding can be requested before the worker finishes its first pass, so
    // resolve a parse tree without ever blocking on it: pending edit bytes,
    // then the cached tree, then a fresh parse of the raw bytes. The inbox
    // mutex keeps the three sources coherent.
    let tree = queue.with_pending(|pending| {
        if let Some(bytes) = pending.get(&uri) {
            return Some(gotmpl_analysis::parse_single_file(bytes).0);
        }
        let workspace = store.read();
        if let Some(tree) = workspace.parsed.get(&uri) {
            return Some(tree.clone());
        }
        workspace
            .raw
            .get(&uri)
            .map(|bytes| gotmpl_analysis::parse_single_file(bytes).0)
    });

    let (groups, comments) = gotmpl_analysis::folding_range(tree.as_ref());

    let mut ranges = Vec::with_capacity(groups.len() + comments.len());
    for group in groups {
        let start: Position = group.span.start.into();
        let end: Position = group.span.end.into();
        // Editors collapse up to, not including, the end line.
        let end_line = if end.line > start.line {
            end.line - 1
        } else {
            end.line
        };
        ranges.push(FoldingRange {
            start_line: start.line,
            start_character: start.character,
            end_line,
            end_character: end.character,
            kind: "region",
        });
    }
    for comment in comments {
        let range: Range = comment.span.into();
        ranges.push(FoldingRange {
            start_line: range.start.line,
            start_character: range.start.character,
            end_line: range.end.line,
            end_character: range.end.character,
            kind: if comment.import_block {
                "imports"
            } else {
                "comment"
            },
        });
    }

    Ok(Some(marshal(&Response::new(id, ranges))?))
}
