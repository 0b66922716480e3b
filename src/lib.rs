//! gotmpl-ls — a language server for Go `text/html` template files.
//!
//! The server speaks the LSP base protocol over stdin/stdout. A single
//! background worker owns the workspace store: it ingests coalesced editor
//! edits, re-parses and re-analyzes affected files, and pushes
//! `textDocument/publishDiagnostics` notifications while the main loop keeps
//! answering requests.

pub mod codec;
pub mod dispatch;
pub mod handlers;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;
pub mod uri;
pub mod worker;
pub mod workspace;

/// Name advertised in `serverInfo` and used for on-disk paths.
pub const SERVER_NAME: &str = "gotmpl-ls";

/// Version advertised in `serverInfo` and printed by `--version`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
