//! End-to-end scenarios over the in-memory transport: the protocol
//! lifecycle, the diagnostics pipeline, edit coalescing, cross-file
//! re-analysis, and folding ahead of the first analysis pass.

use crate::common::{file_uri, start_server, workspace};

#[tokio::test]
async fn initialize_shutdown_exit_lifecycle() {
    let dir = workspace(&[]);
    let (mut client, handle) = start_server();

    client.initialize(1, dir.path()).await;
    let response = client.response_for(1).await;
    let capabilities = &response["result"]["capabilities"];
    assert_eq!(capabilities["textDocumentSync"], 1);
    assert_eq!(capabilities["hoverProvider"], true);
    assert_eq!(capabilities["definitionProvider"], true);
    assert_eq!(capabilities["foldingRangeProvider"], true);
    assert_eq!(response["result"]["serverInfo"]["name"], "gotmpl-ls");

    client
        .request(serde_json::json!(2), "shutdown", serde_json::json!({}))
        .await;
    let response = client.response_for(2).await;
    assert_eq!(response["result"], serde_json::Value::Null);
    assert!(response.get("error").is_none());

    client
        .request(
            serde_json::json!(3),
            "textDocument/hover",
            serde_json::json!({}),
        )
        .await;
    let response = client.response_for(3).await;
    assert_eq!(response["error"]["code"], -32600);
    assert_eq!(
        response["error"]["message"],
        "illegal request while server shutting down"
    );

    client.notify("exit", serde_json::json!({})).await;
    let result = handle.await.expect("server task completed");
    assert!(result.is_ok(), "server exits cleanly: {result:?}");
}

#[tokio::test]
async fn string_request_ids_are_reemitted_as_integers() {
    let dir = workspace(&[]);
    let (mut client, _handle) = start_server();

    client
        .request(
            serde_json::json!("1"),
            "initialize",
            serde_json::json!({"rootUri": gotmpl_ls::uri::path_to_uri(dir.path())}),
        )
        .await;
    let response = client.response_for(1).await;
    assert_eq!(response["id"], serde_json::json!(1));
}

#[tokio::test]
async fn open_and_edit_drive_diagnostics() {
    let dir = workspace(&[("a.tmpl", "{{define \"a\"}}x{{end}}")]);
    let a_uri = file_uri(dir.path(), "a.tmpl");
    let (mut client, _handle) = start_server();

    client.initialize(1, dir.path()).await;
    client.response_for(1).await;

    // The startup scan analyzes the on-disk file.
    let diagnostics = client.diagnostics_for(&a_uri).await;
    assert!(diagnostics.is_empty(), "clean file: {diagnostics:?}");

    // An unclosed block must produce an error wave.
    client.did_open(&a_uri, "{{if .X}}").await;
    let diagnostics = client.diagnostics_for(&a_uri).await;
    assert!(!diagnostics.is_empty());
    assert_eq!(diagnostics[0]["severity"], 1);
    assert!(
        diagnostics[0]["message"]
            .as_str()
            .unwrap()
            .contains("missing {{end}}")
    );

    // Fixing the file clears it again.
    client.did_change(&a_uri, "{{if .X}}ok{{end}}").await;
    let diagnostics = client.diagnostics_for(&a_uri).await;
    assert!(diagnostics.is_empty(), "fixed file: {diagnostics:?}");
}

#[tokio::test]
async fn out_of_workspace_documents_get_no_diagnostics() {
    let dir = workspace(&[("a.tmpl", "ok")]);
    let a_uri = file_uri(dir.path(), "a.tmpl");
    let (mut client, _handle) = start_server();

    client.initialize(1, dir.path()).await;
    client.response_for(1).await;

    // Opened, but outside the workspace root: analysis skips it, so every
    // diagnostics wave the session produces names workspace files only.
    client.did_open("file:///outside/b.tmpl", "{{end}}").await;
    client.did_change(&a_uri, "still ok").await;

    let diagnostics = client.diagnostics_for(&a_uri).await;
    assert!(diagnostics.is_empty());
}

#[tokio::test]
async fn edits_sent_back_to_back_coalesce_to_the_newest_content() {
    // Disk content is broken on purpose; the client's last edit must win
    // over both the intermediate edits and the startup scan.
    let dir = workspace(&[("a.tmpl", "{{end}}")]);
    let a_uri = file_uri(dir.path(), "a.tmpl");
    let (mut client, _handle) = start_server();

    client.did_open(&a_uri, "{{template \"nope1\"}}").await;
    for i in 2..50 {
        client
            .did_change(&a_uri, &format!("{{{{template \"nope{i}\"}}}}"))
            .await;
    }
    client.did_change(&a_uri, "all good 50").await;

    client.initialize(1, dir.path()).await;
    client.response_for(1).await;

    let diagnostics = client.diagnostics_for(&a_uri).await;
    assert!(
        diagnostics.is_empty(),
        "only the newest content is analyzed: {diagnostics:?}"
    );
}

#[tokio::test]
async fn spaced_workspace_paths_key_disk_files_and_edits_the_same() {
    // A root whose absolute path needs percent-encoding: the URI the scan
    // derives from the path and the URI the client sends must collapse to
    // one workspace key, or edits update a file diagnostics never leave.
    let parent = workspace(&[]);
    let root = parent.path().join("my site");
    std::fs::create_dir(&root).expect("creating spaced workspace dir");
    std::fs::write(root.join("a.tmpl"), "{{define \"a\"}}x{{end}}")
        .expect("writing spaced workspace file");
    let a_uri = file_uri(&root, "a.tmpl");
    assert!(a_uri.contains("my site"), "client-side spelling is decoded");
    let (mut client, _handle) = start_server();

    client.initialize(1, &root).await;
    client.response_for(1).await;

    // The startup scan must publish under the client's spelling.
    let diagnostics = client.diagnostics_for(&a_uri).await;
    assert!(diagnostics.is_empty(), "clean file: {diagnostics:?}");

    // And a client edit must reach the same entry the scan created.
    client.did_change(&a_uri, "{{if .X}}").await;
    let diagnostics = client.diagnostics_for(&a_uri).await;
    assert!(!diagnostics.is_empty(), "edit produced an updated wave");
    assert!(
        diagnostics[0]["message"]
            .as_str()
            .unwrap()
            .contains("missing {{end}}")
    );
}

#[tokio::test]
async fn changing_one_file_reanalyzes_its_dependents() {
    let dir = workspace(&[
        ("a.tmpl", "{{define \"header\"}}h{{end}}"),
        ("b.tmpl", "{{template \"header\"}}"),
    ]);
    let a_uri = file_uri(dir.path(), "a.tmpl");
    let b_uri = file_uri(dir.path(), "b.tmpl");
    let (mut client, _handle) = start_server();

    client.initialize(1, dir.path()).await;
    client.response_for(1).await;
    let waves = client.diagnostics_for_all(&[&a_uri, &b_uri]).await;
    assert!(waves.values().all(|diags| diags.is_empty()));

    // Removing the definition must surface an error in the file that
    // references it, in the same iteration.
    client
        .did_change(&a_uri, "{{define \"footer\"}}f{{end}}")
        .await;
    let waves = client.diagnostics_for_all(&[&a_uri, &b_uri]).await;
    assert!(waves[&a_uri].is_empty());
    let b_diags = &waves[&b_uri];
    assert_eq!(b_diags.len(), 1);
    assert!(
        b_diags[0]["message"]
            .as_str()
            .unwrap()
            .contains("\"header\"")
    );
}

#[tokio::test]
async fn folding_answers_before_the_first_analysis_pass() {
    let content = "{{if .Ready}}\nline one\nline two\n{{end}}\n";
    let dir = workspace(&[("a.tmpl", content)]);
    let a_uri = file_uri(dir.path(), "a.tmpl");
    let (mut client, _handle) = start_server();

    client.initialize(1, dir.path()).await;
    client.response_for(1).await;

    // No waiting on diagnostics: the answer may be empty but must not be an
    // error.
    client
        .request(
            serde_json::json!(2),
            "textDocument/foldingRange",
            serde_json::json!({"textDocument": {"uri": a_uri}}),
        )
        .await;
    let response = client.response_for(2).await;
    assert!(response.get("error").is_none());
    assert!(response["result"].is_array());

    // With the document open the fold is guaranteed to resolve.
    client.did_open(&a_uri, content).await;
    client
        .request(
            serde_json::json!(3),
            "textDocument/foldingRange",
            serde_json::json!({"textDocument": {"uri": a_uri}}),
        )
        .await;
    let response = client.response_for(3).await;
    let folds = response["result"].as_array().unwrap();
    assert_eq!(folds.len(), 1);
    assert_eq!(folds[0]["kind"], "region");
    assert_eq!(folds[0]["startLine"], 0);
    // The block closes on line 3; the fold stops one line short of it.
    assert_eq!(folds[0]["endLine"], 2);
}

#[tokio::test]
async fn hover_and_definition_work_on_an_analyzed_file() {
    let dir = workspace(&[
        ("a.tmpl", "{{define \"header\"}}h{{end}}"),
        ("b.tmpl", "{{template \"header\"}}"),
    ]);
    let a_uri = file_uri(dir.path(), "a.tmpl");
    let b_uri = file_uri(dir.path(), "b.tmpl");
    let (mut client, _handle) = start_server();

    client.initialize(1, dir.path()).await;
    client.response_for(1).await;
    client.did_open(&b_uri, "{{template \"header\"}}").await;
    // A published wave for b means its analysis result is in place.
    client.diagnostics_for(&b_uri).await;

    client
        .request(
            serde_json::json!(4),
            "textDocument/hover",
            serde_json::json!({
                "textDocument": {"uri": b_uri},
                "position": {"line": 0, "character": 13},
            }),
        )
        .await;
    let response = client.response_for(4).await;
    assert_eq!(response["result"]["contents"]["kind"], "markdown");
    assert!(
        response["result"]["contents"]["value"]
            .as_str()
            .unwrap()
            .contains("header")
    );

    client
        .request(
            serde_json::json!(5),
            "textDocument/definition",
            serde_json::json!({
                "textDocument": {"uri": b_uri},
                "position": {"line": 0, "character": 4},
            }),
        )
        .await;
    let response = client.response_for(5).await;
    assert_eq!(response["result"][0]["uri"], a_uri);
    assert_eq!(response["result"][0]["range"]["start"]["line"], 0);
}
