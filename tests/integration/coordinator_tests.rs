use crate::common::{open_queue, queue_config};
use std::path::Path;
use std::sync::Arc;
use sumi_sift::checksum::{open_store, ChecksumStore, MemoryChecksumStore};
use sumi_sift::committer::MemoryCommitter;
use sumi_sift::config::{parse_config, Config};
use sumi_sift::crawler::{read_documents, run_session, Coordinator};
use sumi_sift::document::{DocState, DocumentRecord, FetchPhase, Metadata};
use sumi_sift::Pipeline;
use tempfile::TempDir;

fn session_config(dir: &Path) -> Config {
    parse_config(&format!(
        r#"
[pipeline]
workers = 4

[[metadata-filter]]
field = {{ pattern = "status" }}
value = {{ pattern = "draft" }}
on-match = "exclude"

[checksum]
database-path = '{db}'
use-content = true

[queue]
directory = '{queue}'
batch-size = 3
max-per-folder = 2
flush-interval-ms = 50
retry-delay-ms = 1
"#,
        db = dir.join("checksums.db").display(),
        queue = dir.join("queue").display(),
    ))
    .unwrap()
}

fn page(reference: &str, body: &str) -> DocumentRecord {
    DocumentRecord::new(reference)
        .with_metadata(Metadata::new().with("status", "live"))
        .with_content(body)
}

#[tokio::test]
async fn test_sessions_detect_changes() {
    let dir = TempDir::new().unwrap();
    let config = session_config(dir.path());

    let first = MemoryCommitter::new();
    let records = vec![
        page("a", "alpha"),
        page("b", "beta"),
        page("c", "gamma"),
        DocumentRecord::new("draft")
            .with_metadata(Metadata::new().with("status", "draft"))
            .with_content("wip"),
    ];
    let summary = run_session(&config, Box::new(first.clone()), records)
        .await
        .unwrap();
    assert_eq!(summary.documents, 4);
    assert_eq!(summary.states.get(&DocState::New), Some(&3));
    assert_eq!(summary.states.get(&DocState::Rejected), Some(&1));
    assert_eq!(first.upsert_count(), 3);
    assert!(first.is_closed());

    // Same content again, one change, one removal.
    let second = MemoryCommitter::new();
    let records = vec![
        page("a", "alpha"),
        page("b", "beta, edited"),
        DocumentRecord::deleted("c", Metadata::new()),
    ];
    let summary = run_session(&config, Box::new(second.clone()), records)
        .await
        .unwrap();
    assert_eq!(summary.states.get(&DocState::Unmodified), Some(&1));
    assert_eq!(summary.states.get(&DocState::Modified), Some(&1));
    assert_eq!(summary.states.get(&DocState::Deleted), Some(&1));
    assert_eq!(summary.recovery.batches, 0);

    let upserts: Vec<String> = second
        .upsert_requests()
        .into_iter()
        .map(|r| r.reference)
        .collect();
    assert_eq!(upserts, vec!["b"]);
    assert_eq!(second.delete_requests()[0].reference, "c");

    let store = open_store(Some(dir.path().join("checksums.db").as_path())).unwrap();
    assert!(store.get("a").unwrap().is_some());
    assert!(store.get("b").unwrap().is_some());
    assert_eq!(store.get("c").unwrap(), None);
    assert_eq!(store.get("draft").unwrap(), None);
}

#[tokio::test]
async fn test_session_from_json_lines() {
    let dir = TempDir::new().unwrap();
    let config = session_config(dir.path());

    let input = r#"
{"reference": "x", "metadata": {"status": ["live"]}, "content": "one"}
{"reference": "y", "metadata": {"status": ["live"]}}
{"reference": "z", "deleted": true}
"#;
    let records = read_documents(input.as_bytes()).unwrap();
    let committer = MemoryCommitter::new();
    let summary = run_session(&config, Box::new(committer.clone()), records)
        .await
        .unwrap();

    // "y" has no content for the content checksum.
    assert_eq!(summary.states.get(&DocState::Error), Some(&1));
    let mut delivered = committer.references();
    delivered.sort();
    assert_eq!(delivered, vec!["x", "z"]);
}

#[tokio::test]
async fn test_process_all_stages_every_accepted_document() {
    let dir = TempDir::new().unwrap();
    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 4, 3), &committer).await;
    let store: Arc<dyn ChecksumStore> = Arc::new(MemoryChecksumStore::new());
    let coordinator = Arc::new(Coordinator::new(Pipeline::new(store), queue.clone()));

    let records: Vec<DocumentRecord> = (0..40)
        .map(|i| page(&format!("doc-{:02}", i), "body"))
        .collect();
    assert_eq!(coordinator.process_all(records, 6).await.unwrap(), 40);
    assert_eq!(coordinator.state_counts().get(&DocState::New), Some(&40));

    queue.shutdown().await.unwrap();
    let mut delivered = committer.references();
    delivered.sort();
    let expected: Vec<String> = (0..40).map(|i| format!("doc-{:02}", i)).collect();
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn test_repeated_reference_is_evaluated_in_turn() {
    let dir = TempDir::new().unwrap();
    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 10, 3), &committer).await;
    let store: Arc<dyn ChecksumStore> = Arc::new(MemoryChecksumStore::new());
    let coordinator = Arc::new(Coordinator::new(Pipeline::new(store), queue.clone()));

    let records: Vec<DocumentRecord> = (0..5).map(|i| page("same", &i.to_string())).collect();
    assert_eq!(coordinator.process_all(records, 5).await.unwrap(), 5);

    queue.shutdown().await.unwrap();
    assert_eq!(committer.upsert_count(), 5);
}

#[tokio::test]
async fn test_precheck_skips_unchanged_documents() {
    let dir = TempDir::new().unwrap();
    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 10, 3), &committer).await;

    let config = parse_config(
        r#"
[[metadata-filter]]
field = { pattern = "Content-Type" }
value = { pattern = "image/*", method = "wildcard" }
on-match = "exclude"

[checksum]
field = { pattern = "ETag" }

[queue]
directory = "./unused"
"#,
    )
    .unwrap();
    let store: Arc<dyn ChecksumStore> = Arc::new(MemoryChecksumStore::new());
    let pipeline = Pipeline::from_config(&config, Arc::clone(&store)).unwrap();
    let coordinator = Coordinator::new(pipeline, queue.clone());

    let mut image = DocumentRecord::new("logo")
        .with_metadata(Metadata::new().with("Content-Type", "image/png"));
    assert_eq!(coordinator.precheck(&mut image).await, DocState::Rejected);

    let mut html = DocumentRecord::new("home").with_metadata(
        Metadata::new()
            .with("Content-Type", "text/html")
            .with("ETag", "\"v1\""),
    );
    assert_eq!(coordinator.precheck(&mut html).await, DocState::New);
    store.put("home", html.new_checksum.as_deref().unwrap()).unwrap();

    html.reset();
    assert_eq!(coordinator.precheck(&mut html).await, DocState::Unmodified);
    assert_eq!(
        coordinator.pipeline().evaluate(&mut html, FetchPhase::Metadata),
        DocState::Unmodified
    );

    // Prechecks never stage anything.
    queue.shutdown().await.unwrap();
    assert_eq!(committer.request_count(), 0);
}
