//! The background diagnostics worker.
//!
//! One long-running task, started before any frame is read. It waits for the
//! initialize handler to deliver the workspace root, loads every template
//! file under it, then loops: one iteration per "work waiting" signal,
//! parsing the coalesced edits, re-running cross-file analysis, and pushing
//! one `publishDiagnostics` notification per analyzed file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::protocol::{Diagnostic, Notification, PublishDiagnosticsParams};
use crate::uri;
use crate::workspace::{EditQueue, SharedWorkspace, has_template_extension, normalize_path};

/// LSP severity 1: every template problem is an error.
const SEVERITY_ERROR: u8 = 1;

/// Walk `root` and load every file with a template extension. Unreadable
/// files are logged and skipped; the editor will re-send anything it has
/// open anyway.
fn discover_templates(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    let walk = ignore::WalkBuilder::new(root).standard_filters(false).build();
    for entry in walk {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(%err, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.into_path();
        if !has_template_extension(&path) {
            continue;
        }
        match std::fs::read(&path) {
            Ok(bytes) => files.push((path, bytes)),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "skipping unreadable template file")
            }
        }
    }
    files
}

/// One analysis cycle: parse the snapshot into the store, re-run semantic
/// analysis, and return the notifications to publish.
pub fn process_edits(
    store: &SharedWorkspace,
    snapshot: std::collections::HashMap<String, Vec<u8>>,
) -> Vec<PublishDiagnosticsParams> {
    let mut workspace = store.write();

    let mut changed: Vec<String> = Vec::with_capacity(snapshot.len());
    for (uri, bytes) in snapshot {
        if !workspace.accepts(&uri) {
            tracing::info!(%uri, "skipping edit outside the workspace");
            continue;
        }
        let (tree, parse_errors) = gotmpl_analysis::parse_single_file(&bytes);
        workspace.raw.insert(uri.clone(), bytes);
        workspace.parsed.insert(uri.clone(), tree);
        workspace.parse_errors.insert(uri.clone(), parse_errors);
        changed.push(uri);
    }

    // A snapshot covering the whole parsed set (the first iteration, and any
    // editor-driven mass update) gets the cheaper single pass; otherwise the
    // analyzer works out which files the change reaches.
    let covers_all = workspace.parsed.keys().all(|uri| changed.contains(uri));
    let (analyzed, analyze_errors) = if covers_all {
        gotmpl_analysis::full_workspace_analysis(&workspace.parsed)
    } else {
        gotmpl_analysis::batch_change_analysis(&workspace.parsed, &changed)
    };
    tracing::debug!(
        changed = changed.len(),
        affected = analyzed.len(),
        full = covers_all,
        "analysis cycle complete"
    );
    workspace.analyzed.extend(analyzed);
    workspace.analyze_errors.extend(analyze_errors);

    let mut notifications = Vec::with_capacity(workspace.analyzed.len());
    for uri in workspace.analyzed.keys() {
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        if let Some(parse_errors) = workspace.parse_errors.get(uri) {
            diagnostics.extend(parse_errors.iter().map(|e| Diagnostic {
                range: e.span.into(),
                message: e.message.clone(),
                severity: SEVERITY_ERROR,
            }));
        }
        if let Some(analyze_errors) = workspace.analyze_errors.get(uri) {
            diagnostics.extend(analyze_errors.iter().map(|e| Diagnostic {
                range: e.span.into(),
                message: e.message.clone(),
                severity: SEVERITY_ERROR,
            }));
        }
        notifications.push(PublishDiagnosticsParams {
            uri: uri.clone(),
            diagnostics,
        });
    }
    notifications
}

/// Worker entry point. Panics on invariant violations; those are bugs, and
/// the server task turns the aborted join into a process exit.
pub async fn run(
    store: SharedWorkspace,
    queue: Arc<EditQueue>,
    mut signal_rx: mpsc::Receiver<()>,
    root_rx: oneshot::Receiver<String>,
    outgoing: mpsc::Sender<Vec<u8>>,
) {
    let root_uri = match root_rx.await {
        Ok(root_uri) => root_uri,
        Err(_) => {
            panic!("workspace root channel closed before initialize delivered a root URI")
        }
    };

    let root = match uri::uri_to_path(&root_uri) {
        Ok(path) => normalize_path(&path),
        Err(err) => {
            tracing::error!(uri = %root_uri, %err, "workspace root URI is unusable");
            panic!("workspace root URI {root_uri:?} is unusable: {err:#}");
        }
    };
    tracing::info!(root = %root.display(), "analysis worker starting");

    let discovered = discover_templates(&root);
    tracing::info!(files = discovered.len(), "workspace scan complete");

    let mut seeds = Vec::with_capacity(discovered.len());
    {
        let mut workspace = store.write();
        workspace.root = Some(root);
        for (path, bytes) in discovered {
            // Store keys are percent-decoded URIs; decode here so a disk
            // file and the client's didOpen/didChange for it share one key.
            let file_uri = uri::decode_uri(&uri::path_to_uri(&path));
            workspace.raw.insert(file_uri.clone(), bytes.clone());
            seeds.push((file_uri, bytes));
        }
    }
    // Client edits that raced ahead of initialize win over on-disk content.
    queue.seed(seeds);

    loop {
        if signal_rx.recv().await.is_none() {
            tracing::info!("edit signal channel closed, analysis worker stopping");
            return;
        }
        let snapshot = queue.drain(&mut signal_rx);

        let notifications = process_edits(&store, snapshot);
        for params in notifications {
            let notification = Notification::new("textDocument/publishDiagnostics", params);
            let body = match serde_json::to_vec(&notification) {
                Ok(body) => body,
                Err(err) => panic!("marshalling publishDiagnostics: {err}"),
            };
            if outgoing.send(body).await.is_err() {
                tracing::info!("output channel closed, analysis worker stopping");
                return;
            }
        }

        if let Err(report) = store.read().check_invariants() {
            tracing::error!(%report, "workspace store invariants violated after analysis cycle");
            panic!("workspace store invariants violated: {report}");
        }
    }
}
