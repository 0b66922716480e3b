//! Shared session state: the workspace store, the coalescing edit inbox, and
//! the editor's open-document set.
//!
//! The store has exactly one writer (the diagnostics worker) and many
//! readers (method handlers). Handlers that need a snapshot coherent with
//! pending edits go through the edit-inbox mutex; plain reads are
//! best-effort.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gotmpl_analysis::{AnalyzeError, AnalyzedTemplate, ParseError, ParsedTemplate};
use tokio::sync::mpsc;

use crate::uri;

/// File extensions that belong to the workspace. Longest spellings first so
/// log output reads naturally; matching is suffix-based either way.
pub const TEMPLATE_EXTENSIONS: &[&str] = &[
    "go.html", "go.tmpl", "go.txt", "gohtml", "gotmpl", "tmpl", "tpl", "html",
];

/// Whether `path` carries one of the template extensions.
pub fn has_template_extension(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    TEMPLATE_EXTENSIONS
        .iter()
        .any(|ext| name.len() > ext.len() + 1 && name.ends_with(ext) && {
            let dot = name.len() - ext.len() - 1;
            name.as_bytes()[dot] == b'.'
        })
}

/// Lexically resolve `.` and `..` components so prefix checks against the
/// workspace root are meaningful.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Per-session store of everything known about the workspace, keyed by
/// percent-decoded URI. The five maps move in lockstep: after every worker
/// cycle they hold the same key set.
#[derive(Debug, Default)]
pub struct Workspace {
    pub raw: HashMap<String, Vec<u8>>,
    pub parsed: HashMap<String, ParsedTemplate>,
    pub parse_errors: HashMap<String, Vec<ParseError>>,
    pub analyzed: HashMap<String, AnalyzedTemplate>,
    pub analyze_errors: HashMap<String, Vec<AnalyzeError>>,
    pub root: Option<PathBuf>,
}

impl Workspace {
    /// The workspace predicate: `uri` converts to a path under the root and
    /// carries a template extension. Anything else never enters the maps.
    pub fn accepts(&self, uri: &str) -> bool {
        let Some(root) = &self.root else {
            return false;
        };
        let Ok(path) = uri::uri_to_path(uri) else {
            return false;
        };
        let path = normalize_path(&path);
        path.starts_with(root) && has_template_extension(&path)
    }

    /// Key-set parity across the five maps, plus the containment the
    /// handlers rely on. Violations are bugs; the caller aborts.
    pub fn check_invariants(&self) -> Result<(), String> {
        let sizes = [
            ("raw", self.raw.len()),
            ("parsed", self.parsed.len()),
            ("parse_errors", self.parse_errors.len()),
            ("analyzed", self.analyzed.len()),
            ("analyze_errors", self.analyze_errors.len()),
        ];
        if sizes.iter().any(|(_, len)| *len != self.raw.len()) {
            return Err(format!("workspace map sizes diverged: {sizes:?}"));
        }

        for uri in self.analyzed.keys() {
            if !self.parsed.contains_key(uri) || !self.raw.contains_key(uri) {
                return Err(format!(
                    "analyzed file {uri} is missing from the parsed/raw maps"
                ));
            }
            if !self.parse_errors.contains_key(uri) || !self.analyze_errors.contains_key(uri) {
                return Err(format!("analyzed file {uri} is missing an error list"));
            }
        }

        Ok(())
    }
}

/// The workspace store behind its lock. The `Arc` is created once at startup
/// and cloned into every component; the store itself is never reassigned.
#[derive(Clone, Default)]
pub struct SharedWorkspace(Arc<RwLock<Workspace>>);

impl SharedWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Workspace> {
        match self.0.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Workspace> {
        match self.0.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Capacity of the "work waiting" channel. The posting discipline keeps at
/// most one token in flight; the second slot absorbs the seeding edge. A
/// full channel is a bug.
const EDIT_SIGNAL_CAPACITY: usize = 2;

/// The coalescing edit inbox between the main loop and the worker.
///
/// Re-posting a URI overwrites its earlier pending bytes: only the newest
/// content per URI matters. The signal channel carries "some edit is
/// waiting", not a count — it is posted only on the empty-to-non-empty
/// transition.
pub struct EditQueue {
    pending: Mutex<HashMap<String, Vec<u8>>>,
    signal: mpsc::Sender<()>,
}

impl EditQueue {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
        let (signal, signal_rx) = mpsc::channel(EDIT_SIGNAL_CAPACITY);
        (
            Arc::new(Self {
                pending: Mutex::new(HashMap::new()),
                signal,
            }),
            signal_rx,
        )
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self) {
        use mpsc::error::TrySendError;
        match self.signal.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                panic!("edit signal channel exceeded its capacity; signaling discipline is broken")
            }
            Err(TrySendError::Closed(())) => {
                panic!("edit signal channel closed; the analysis worker is gone")
            }
        }
    }

    /// Record the latest content for `uri`.
    pub fn post(&self, uri: String, bytes: Vec<u8>) {
        let mut pending = self.lock_pending();
        let was_empty = pending.is_empty();
        pending.insert(uri, bytes);
        drop(pending);
        if was_empty {
            self.notify();
        }
    }

    /// Install on-disk content discovered at startup without clobbering
    /// edits the client has already sent.
    pub fn seed(&self, files: impl IntoIterator<Item = (String, Vec<u8>)>) {
        let mut pending = self.lock_pending();
        for (uri, bytes) in files {
            pending.entry(uri).or_insert(bytes);
        }
        let non_empty = !pending.is_empty();
        drop(pending);
        if non_empty {
            self.notify();
        }
    }

    /// Snapshot and clear the inbox, coalescing any extra signals that
    /// arrived since the one being served. Runs entirely under the inbox
    /// mutex.
    pub fn drain(&self, signal_rx: &mut mpsc::Receiver<()>) -> HashMap<String, Vec<u8>> {
        let mut pending = self.lock_pending();
        let snapshot = std::mem::take(&mut *pending);
        while signal_rx.try_recv().is_ok() {}
        snapshot
    }

    /// Run `f` over the pending map under the inbox mutex. Used by readers
    /// that must see edits and store in a coherent order.
    pub fn with_pending<T>(&self, f: impl FnOnce(&HashMap<String, Vec<u8>>) -> T) -> T {
        f(&self.lock_pending())
    }
}

/// URIs the editor currently has open, toggled by didOpen/didClose.
#[derive(Default)]
pub struct OpenDocuments(Mutex<HashSet<String>>);

impl OpenDocuments {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn open(&self, uri: String) {
        self.lock().insert(uri);
    }

    pub fn close(&self, uri: &str) {
        self.lock().remove(uri);
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.lock().contains(uri)
    }
}
