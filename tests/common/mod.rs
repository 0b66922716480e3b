//! Shared fixtures: an in-memory LSP client wired to a running server.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use gotmpl_ls::codec::{FrameReader, FrameWriter};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestClient {
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    reader: FrameReader<ReadHalf<DuplexStream>>,
}

/// Spawn the server over an in-memory duplex transport and return the
/// client end plus the server task handle.
pub fn start_server() -> (TestClient, JoinHandle<Result<()>>) {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_end);
    let handle = tokio::spawn(gotmpl_ls::server::run(server_read, server_write));

    let (client_read, client_write) = tokio::io::split(client_end);
    (
        TestClient {
            writer: FrameWriter::new(client_write),
            reader: FrameReader::new(client_read),
        },
        handle,
    )
}

impl TestClient {
    pub async fn send(&mut self, message: serde_json::Value) {
        let body = serde_json::to_vec(&message).expect("serializing test message");
        self.writer
            .write_frame(&body)
            .await
            .expect("writing test frame");
    }

    pub async fn request(&mut self, id: serde_json::Value, method: &str, params: serde_json::Value) {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await;
    }

    pub async fn notify(&mut self, method: &str, params: serde_json::Value) {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await;
    }

    pub async fn initialize(&mut self, id: i64, root: &Path) {
        let root_uri = gotmpl_ls::uri::path_to_uri(root);
        self.request(
            serde_json::json!(id),
            "initialize",
            serde_json::json!({"rootUri": root_uri, "capabilities": {}}),
        )
        .await;
    }

    pub async fn did_open(&mut self, uri: &str, text: &str) {
        self.notify(
            "textDocument/didOpen",
            serde_json::json!({"textDocument": {
                "uri": uri, "languageId": "gotmpl", "version": 1, "text": text
            }}),
        )
        .await;
    }

    pub async fn did_change(&mut self, uri: &str, text: &str) {
        self.notify(
            "textDocument/didChange",
            serde_json::json!({
                "textDocument": {"uri": uri, "version": 2},
                "contentChanges": [{"text": text}],
            }),
        )
        .await;
    }

    /// Next message from the server, whatever it is.
    pub async fn recv(&mut self) -> serde_json::Value {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a server message")
            .expect("reading server frame")
            .expect("server closed the stream");
        serde_json::from_slice(&frame).expect("server sent invalid JSON")
    }

    /// Next response carrying `id`, skipping notifications.
    pub async fn response_for(&mut self, id: i64) -> serde_json::Value {
        loop {
            let message = self.recv().await;
            if message["id"] == serde_json::json!(id) {
                return message;
            }
        }
    }

    /// One `publishDiagnostics` wave per listed URI, in whatever order the
    /// server emits them.
    pub async fn diagnostics_for_all(
        &mut self,
        uris: &[&str],
    ) -> std::collections::HashMap<String, Vec<serde_json::Value>> {
        let mut waves = std::collections::HashMap::new();
        while waves.len() < uris.len() {
            let message = self.recv().await;
            if message["method"] != "textDocument/publishDiagnostics" {
                continue;
            }
            let Some(uri) = message["params"]["uri"].as_str() else {
                continue;
            };
            if uris.contains(&uri) && !waves.contains_key(uri) {
                let diagnostics = message["params"]["diagnostics"]
                    .as_array()
                    .expect("diagnostics is an array")
                    .clone();
                waves.insert(uri.to_string(), diagnostics);
            }
        }
        waves
    }

    /// Diagnostics from the next `publishDiagnostics` for `uri`, skipping
    /// everything else.
    pub async fn diagnostics_for(&mut self, uri: &str) -> Vec<serde_json::Value> {
        loop {
            let message = self.recv().await;
            if message["method"] == "textDocument/publishDiagnostics"
                && message["params"]["uri"] == uri
            {
                return message["params"]["diagnostics"]
                    .as_array()
                    .expect("diagnostics is an array")
                    .clone();
            }
        }
    }
}

/// Create an on-disk workspace from (relative path, contents) pairs.
pub fn workspace(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("creating workspace dir");
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("creating workspace subdir");
        }
        std::fs::write(&path, contents).expect("writing workspace file");
    }
    dir
}

/// URI of a file inside the test workspace, spelled the way the server
/// keys it: built from the path, then percent-decoded.
pub fn file_uri(root: &Path, name: &str) -> String {
    gotmpl_ls::uri::decode_uri(&gotmpl_ls::uri::path_to_uri(&root.join(name)))
}
