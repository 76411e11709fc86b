//! End-to-end tests driving the workspace through its public API.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use lsp_types::Diagnostic;
use monty_analysis::AnalysisEvent;
use monty_analysis::CompletionOptions;
use monty_analysis::DocumentChange;
use monty_analysis::Error;
use monty_analysis::Priority;
use monty_analysis::ServerConfig;
use monty_analysis::SourceEdit;
use monty_analysis::SourcePosition;
use monty_analysis::SourcePositionEncoding;
use monty_analysis::Workspace;
use monty_analysis::testing::PARSE_ERROR_MARKER;
use monty_analysis::testing::TestServices;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use url::Url;

/// Creates a workspace wired to fresh test services.
fn workspace() -> (Arc<Workspace>, TestServices) {
    let workspace = Workspace::new(ServerConfig::default());
    let services = TestServices::new();
    workspace.set_services(services.interpreter());
    (workspace, services)
}

/// Creates a ranged replacement edit on line zero.
fn edit(line: u32, start: u32, end: u32, text: &str) -> SourceEdit {
    SourceEdit::new(
        SourcePosition::new(line, start)..SourcePosition::new(line, end),
        SourcePositionEncoding::UTF8,
        text,
    )
}

/// Creates a change producing the given version.
fn change(version: i32, edits: Vec<SourceEdit>) -> DocumentChange {
    DocumentChange {
        version: Some(version),
        edits: Some(edits),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_order_edits_converge() {
    let (workspace, _services) = workspace();
    let mut events = workspace.subscribe();

    let uri: Url = "file:///a".parse().unwrap();
    let entry = workspace.open_document(&uri, 1, "x".to_string());

    // Version 3 deletes the first character; it arrives before version 2
    workspace
        .change_document(&uri, change(3, vec![edit(0, 0, 1, "")]), true)
        .unwrap();
    assert_eq!(entry.document().text(0).as_deref(), Some("x"));

    // Version 2 inserts after the first character; version 3 drains after it
    workspace
        .change_document(&uri, change(2, vec![edit(0, 1, 1, "y")]), true)
        .unwrap();
    assert_eq!(entry.document().text(0).as_deref(), Some("y"));
    assert_eq!(entry.document().version(0), 3);

    workspace.wait_for_complete().await;

    // Published diagnostic versions never regress
    let mut published: HashMap<(Url, u32), Vec<i32>> = HashMap::new();
    while let Ok(event) = events.try_recv() {
        if let AnalysisEvent::PublishDiagnostics {
            uri, part, version, ..
        } = event
        {
            published.entry((uri, part)).or_default().push(version);
        }
    }

    for ((uri, part), versions) in published {
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted, "versions regressed for {uri}#{part}");
        assert!(*versions.last().unwrap() >= 3);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn changes_are_routed_by_part() {
    let (workspace, _services) = workspace();

    let part0: Url = "file:///n.ipynb#0".parse().unwrap();
    let part1: Url = "file:///n.ipynb#1".parse().unwrap();
    let entry = workspace.open_document(&part0, 1, "a".to_string());
    workspace.open_document(&part1, 1, "b".to_string());

    workspace
        .change_document(&part1, change(2, vec![SourceEdit::full("bb")]), true)
        .unwrap();

    assert_eq!(entry.document().text(0).as_deref(), Some("a"));
    assert_eq!(entry.document().text(1).as_deref(), Some("bb"));
    assert_eq!(entry.document().version(0), 1);
    assert_eq!(entry.document().version(1), 2);

    workspace.wait_for_complete().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn parse_intents_are_throttled() {
    let (workspace, services) = workspace();

    let uri: Url = "file:///a.py".parse().unwrap();
    let entry = workspace.add_file(&uri);
    entry.document().reset(0, 1, Some("x = 1\n".to_string()));

    services.parser.set_delay(Duration::from_millis(200));
    for _ in 0..10 {
        workspace.enqueue(entry.clone(), Priority::Normal, false);
    }

    workspace.wait_for_complete().await;

    let parses = services.parser.parse_count();
    assert!(parses >= 1, "at least one parse should run");
    assert!(parses <= 3, "at most 3 parse intents may be in flight, got {parses}");

    // The surviving parse observed the newest text
    let snapshot = entry.parse_snapshot().expect("should have parsed");
    assert_eq!(snapshot.cookie.version(0), Some(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn diagnostics_publish_at_the_parsed_version() {
    let (workspace, services) = workspace();
    let mut events = workspace.subscribe();

    let uri: Url = "file:///a.py".parse().unwrap();
    services.analyzer.set_diagnostics(
        &uri,
        0,
        vec![Diagnostic {
            message: "something is off".to_string(),
            ..Default::default()
        }],
    );

    workspace.open_document(&uri, 5, "x = 1\n".to_string());
    workspace.wait_for_complete().await;

    let mut saw_publish = false;
    while let Ok(event) = events.try_recv() {
        if let AnalysisEvent::PublishDiagnostics {
            uri: published,
            part,
            version,
            diagnostics,
        } = event
        {
            saw_publish = true;
            assert_eq!(published, uri);
            assert_eq!(part, 0);
            assert_eq!(version, 5);
            assert_eq!(diagnostics.len(), 1);
        }
    }

    assert!(saw_publish, "diagnostics should have been published");
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_a_module_cascades_to_importers() {
    let (workspace, services) = workspace();

    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("m.py"), "def helper(count):\n    pass\n").unwrap();
    fs::write(dir.path().join("u.py"), "import m\n").unwrap();

    workspace.load_directory(dir.path()).await.unwrap();
    workspace.wait_for_complete().await;

    // Both modules are registered under their computed names
    assert_eq!(services.analyzer.known_names(), vec!["m", "u"]);
    let m_uri = Url::from_file_path(dir.path().join("m.py")).unwrap();
    let (name, aliases) = services.analyzer.module_names(&m_uri).unwrap();
    assert_eq!(name, "m");
    assert_eq!(aliases, vec!["m"]);

    // Open the importer and complete after `m.`
    let u_uri = Url::from_file_path(dir.path().join("u.py")).unwrap();
    workspace.open_document(&u_uri, 1, "import m\nvalue = m.".to_string());
    workspace.wait_for_complete().await;

    let completions = workspace
        .completion(
            &u_uri,
            SourcePosition::new(1, 10),
            None,
            &CompletionOptions::default(),
        )
        .await
        .unwrap();
    let labels: Vec<_> = completions.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, vec!["helper"]);

    // Delete the imported module
    let analyzed_before = services.analyzer.analyzed().len();
    workspace.file_deleted(&m_uri);
    workspace.wait_for_complete().await;

    assert!(workspace.store().try_get(&m_uri).is_none());
    assert_eq!(services.analyzer.known_names(), vec!["u"]);

    // The importer was re-enqueued and analyzed again
    let analyzed: Vec<_> = services.analyzer.analyzed()[analyzed_before..].to_vec();
    assert!(analyzed.contains(&u_uri), "importer should be reanalyzed");

    // Completion no longer offers members of the removed module
    let completions = workspace
        .completion(
            &u_uri,
            SourcePosition::new(1, 10),
            None,
            &CompletionOptions::default(),
        )
        .await
        .unwrap();
    assert!(completions.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn read_requests_reject_unanalyzable_documents() {
    let (workspace, _services) = workspace();

    let uri: Url = "file:///requirements.txt".parse().unwrap();
    workspace.open_document(&uri, 1, "requests==2.31.0\n".to_string());
    workspace.wait_for_complete().await;

    let result = workspace
        .completion(
            &uri,
            SourcePosition::new(0, 0),
            None,
            &CompletionOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(Error::UnsupportedDocumentType(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn completion_rejects_mismatched_versions() {
    let (workspace, _services) = workspace();

    let uri: Url = "file:///a.py".parse().unwrap();
    workspace.open_document(&uri, 6, "x = 1\n".to_string());
    workspace.wait_for_complete().await;

    let result = workspace
        .completion(
            &uri,
            SourcePosition::new(0, 0),
            Some(7),
            &CompletionOptions::default(),
        )
        .await;

    match result {
        Err(Error::MismatchedVersion { expected, actual }) => {
            assert_eq!(expected, 7);
            assert_eq!(actual, 6);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn opening_an_open_document_resets_it() {
    let (workspace, _services) = workspace();

    let uri: Url = "file:///a.py".parse().unwrap();
    let first = workspace.open_document(&uri, 1, "first".to_string());
    let second = workspace.open_document(&uri, 2, "second".to_string());

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(workspace.store().len(), 1);
    assert_eq!(first.document().text(0).as_deref(), Some("second"));
    assert_eq!(first.document().version(0), 2);

    workspace.wait_for_complete().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unparsable_sources_produce_empty_results() {
    let (workspace, _services) = workspace();
    let mut events = workspace.subscribe();

    let uri: Url = "file:///bad.py".parse().unwrap();
    workspace.open_document(&uri, 1, format!("x = 1 {PARSE_ERROR_MARKER}\n"));
    workspace.wait_for_complete().await;

    // The parse produced no cookie, so the sentinel version is reported
    let mut saw_sentinel = false;
    while let Ok(event) = events.try_recv() {
        if let AnalysisEvent::ParseComplete { uri: parsed, version } = event
            && parsed == uri
        {
            assert_eq!(version, 0);
            saw_sentinel = true;
        }
    }
    assert!(saw_sentinel);

    let completions = workspace
        .completion(
            &uri,
            SourcePosition::new(0, 0),
            None,
            &CompletionOptions {
                statement_keywords: false,
                expression_keywords: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(completions.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn changes_to_open_documents_from_disk_are_ignored() {
    let (workspace, services) = workspace();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.py");
    fs::write(&path, "x = 1\n").unwrap();

    let uri = Url::from_file_path(&path).unwrap();
    workspace.open_document(&uri, 1, "x = 2\n".to_string());
    workspace.wait_for_complete().await;

    let parses = services.parser.parse_count();
    workspace.file_changed(&uri);
    workspace.wait_for_complete().await;

    // The in-memory buffer wins over the file system
    assert_eq!(services.parser.parse_count(), parses);
}

#[tokio::test(flavor = "multi_thread")]
async fn configuration_changes_requeue_every_document() {
    let (workspace, services) = workspace();

    workspace.open_document(&"file:///a.py".parse().unwrap(), 1, "a = 1\n".to_string());
    workspace.open_document(&"file:///b.py".parse().unwrap(), 1, "b = 2\n".to_string());
    workspace.wait_for_complete().await;

    let parses = services.parser.parse_count();
    workspace.configuration_changed();
    workspace.wait_for_complete().await;

    assert_eq!(services.analyzer.reload_count(), 1);
    assert_eq!(services.parser.parse_count(), parses + 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_drains_and_releases_the_analyzer() {
    let (workspace, _services) = workspace();

    let uri: Url = "file:///a.py".parse().unwrap();
    let entry = workspace.open_document(&uri, 1, "x = 1\n".to_string());
    workspace.shutdown().await;

    // Work enqueued after shutdown observes the released services
    workspace.enqueue(entry, Priority::Normal, true);
    workspace.wait_for_complete().await;

    let completions = workspace
        .completion(
            &uri,
            SourcePosition::new(0, 0),
            None,
            &CompletionOptions::default(),
        )
        .await
        .unwrap();
    assert!(completions.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn workspace_symbols_match_prefixes_case_insensitively() {
    let (workspace, _services) = workspace();

    workspace.open_document(
        &"file:///a.py".parse().unwrap(),
        1,
        "def Greet(name):\n    pass\n".to_string(),
    );
    workspace.open_document(
        &"file:///b.py".parse().unwrap(),
        1,
        "def greet_all(names):\n    pass\n\ndef other():\n    pass\n".to_string(),
    );
    workspace.wait_for_complete().await;

    let symbols = workspace.workspace_symbols("gre");
    let mut names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Greet", "greet_all"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn signature_help_tracks_the_active_argument() {
    let (workspace, _services) = workspace();

    let uri: Url = "file:///a.py".parse().unwrap();
    let text = "def greet(name, punctuation):\n    pass\n\ngreet(1, ".to_string();
    workspace.open_document(&uri, 1, text);
    workspace.wait_for_complete().await;

    let help = workspace
        .signature_help(&uri, SourcePosition::new(3, 9), None)
        .await
        .unwrap()
        .expect("should produce signature help");

    assert_eq!(help.signatures.len(), 1);
    assert_eq!(help.signatures[0].label, "greet(name, punctuation)");
    assert_eq!(help.active_parameter, Some(1));
    assert_eq!(help.active_signature, Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn hover_renders_analyzed_values() {
    let (workspace, _services) = workspace();

    let uri: Url = "file:///a.py".parse().unwrap();
    workspace.open_document(
        &uri,
        1,
        "def greet(name):\n    pass\n\ngreet(1)\n".to_string(),
    );
    workspace.wait_for_complete().await;

    let hover = workspace
        .hover(&uri, SourcePosition::new(3, 2), None)
        .await
        .unwrap()
        .expect("should produce a hover");

    match hover.contents {
        lsp_types::HoverContents::Scalar(lsp_types::MarkedString::String(text)) => {
            assert_eq!(text, "greet: def greet(name)");
        }
        other => panic!("unexpected contents: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn references_resolve_declarations() {
    let (workspace, _services) = workspace();

    let uri: Url = "file:///a.py".parse().unwrap();
    workspace.open_document(
        &uri,
        1,
        "def greet(name):\n    pass\n\ngreet(1)\n".to_string(),
    );
    workspace.wait_for_complete().await;

    let references = workspace
        .references(&uri, SourcePosition::new(3, 2), None, true)
        .await
        .unwrap();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].range.start.line, 0);

    // Without declarations, the definition reference is filtered out
    let references = workspace
        .references(&uri, SourcePosition::new(3, 2), None, false)
        .await
        .unwrap();
    assert!(references.is_empty());
}
