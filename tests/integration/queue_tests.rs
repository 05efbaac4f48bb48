use crate::common::{open_queue, queue_config, upsert, SwitchableCommitter};
use std::collections::HashMap;
use std::sync::Arc;
use sumi_sift::checksum::{ChecksumStore, Checksummer, MemoryChecksumStore};
use sumi_sift::committer::{CommitterRequest, MemoryCommitter};
use sumi_sift::document::{Content, DocState, DocumentRecord, FetchPhase, Metadata};
use sumi_sift::pipeline::Stage;
use sumi_sift::queue::{scan_staging, CommitQueue, QueueError};
use sumi_sift::Pipeline;
use tempfile::TempDir;

fn references(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("doc-{:03}", i)).collect()
}

#[tokio::test]
async fn test_batch_boundary() {
    let dir = TempDir::new().unwrap();
    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 10, 5), &committer).await;

    for reference in references(11) {
        queue.submit(upsert(&reference)).await.unwrap();
    }

    let scan = scan_staging(dir.path()).unwrap();
    assert_eq!(scan.batches.len(), 2);
    assert_eq!(scan.batches[0].positions.len(), 10);
    assert!(scan.batches[0].closed);
    assert_eq!(scan.batches[1].positions.len(), 1);
    assert!(!scan.batches[1].closed);

    // The first batch is deliverable while the second is still open.
    let stats = queue.stats().unwrap();
    assert_eq!(stats.ready_batches, 1);
    assert_eq!(stats.ready_requests, 10);
    assert_eq!(stats.open_requests, 1);

    assert_eq!(queue.flush_ready().await.unwrap(), 1);
    assert_eq!(committer.upsert_count(), 10);

    queue.shutdown().await.unwrap();
    assert_eq!(committer.references(), references(11));
}

#[tokio::test]
async fn test_folder_rollover() {
    let dir = TempDir::new().unwrap();
    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 10, 5), &committer).await;

    for reference in references(55) {
        queue.submit(upsert(&reference)).await.unwrap();
    }
    queue.close_current_batch().await.unwrap();

    let scan = scan_staging(dir.path()).unwrap();
    assert_eq!(scan.batches.len(), 6);
    let mut per_folder: HashMap<u64, usize> = HashMap::new();
    for batch in &scan.batches {
        *per_folder.entry(batch.folder).or_default() += 1;
    }
    assert_eq!(per_folder.get(&1), Some(&5));
    assert_eq!(per_folder.get(&2), Some(&1));
    assert_eq!(scan.batches[5].positions.len(), 5);

    queue.shutdown().await.unwrap();
    assert_eq!(committer.upsert_count(), 55);
    assert_eq!(committer.references(), references(55));
    assert!(scan_staging(dir.path()).unwrap().batches.is_empty());
}

#[tokio::test]
async fn test_recovery_after_crash_delivers_exactly_once() {
    let dir = TempDir::new().unwrap();

    {
        let committer = MemoryCommitter::new();
        let queue = open_queue(queue_config(dir.path(), 10, 5), &committer).await;
        for reference in references(25) {
            queue.submit(upsert(&reference)).await.unwrap();
        }
        // Crash: nothing is flushed and the open batch is never closed.
        assert_eq!(committer.request_count(), 0);
    }

    let committer = MemoryCommitter::new();
    let queue = CommitQueue::open(
        queue_config(dir.path(), 10, 5),
        Box::new(committer.clone()),
        None,
    )
    .await
    .unwrap();
    let report = queue.recover().await.unwrap();
    assert_eq!(report.batches, 3);
    assert_eq!(report.requests, 25);
    assert_eq!(report.finalized, 1);

    // A second call changes nothing.
    assert_eq!(queue.recover().await.unwrap().batches, 0);

    assert_eq!(queue.flush_ready().await.unwrap(), 3);
    assert_eq!(committer.references(), references(25));

    // New submissions come after everything recovered.
    queue.submit(upsert("after-restart")).await.unwrap();
    queue.shutdown().await.unwrap();
    assert_eq!(committer.request_count(), 26);
    assert_eq!(committer.references().last().map(String::as_str), Some("after-restart"));
    drop(queue);

    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 10, 5), &committer).await;
    assert_eq!(queue.flush_ready().await.unwrap(), 0);
    assert_eq!(committer.request_count(), 0);
}

#[tokio::test]
async fn test_signature_waits_for_delivery_across_crash() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn ChecksumStore> = Arc::new(MemoryChecksumStore::new());
    let pipeline =
        Pipeline::new(Arc::clone(&store)).with_stage(Stage::Checksum(Checksummer::content()));
    let page = || DocumentRecord::new("page").with_content("body v1");

    let mut doc = page();
    assert_eq!(pipeline.evaluate(&mut doc, FetchPhase::Document), DocState::New);
    let request = CommitterRequest::upsert("page", Metadata::new(), Some("body v1".into()));

    {
        let committer = MemoryCommitter::new();
        let queue = CommitQueue::open(
            queue_config(dir.path(), 10, 5),
            Box::new(committer.clone()),
            Some(Arc::clone(&store)),
        )
        .await
        .unwrap();
        queue.recover().await.unwrap();
        queue
            .submit_with_signature(request, doc.new_checksum.clone())
            .await
            .unwrap();
        // Crash before the batch is delivered.
        assert_eq!(committer.request_count(), 0);
    }

    // Staged but undelivered, so the next crawl still sees a new document.
    assert_eq!(store.get("page").unwrap(), None);
    let mut again = page();
    assert_eq!(pipeline.evaluate(&mut again, FetchPhase::Document), DocState::New);

    let committer = MemoryCommitter::new();
    let queue = CommitQueue::open(
        queue_config(dir.path(), 10, 5),
        Box::new(committer.clone()),
        Some(Arc::clone(&store)),
    )
    .await
    .unwrap();
    assert_eq!(queue.recover().await.unwrap().requests, 1);
    queue.shutdown().await.unwrap();

    assert_eq!(committer.references(), vec!["page"]);
    assert_eq!(store.get("page").unwrap(), doc.new_checksum);
    let mut after = page();
    assert_eq!(pipeline.evaluate(&mut after, FetchPhase::Document), DocState::Unmodified);
}

#[tokio::test]
async fn test_recovery_ignores_half_written_files() {
    let dir = TempDir::new().unwrap();

    {
        let committer = MemoryCommitter::new();
        let queue = open_queue(queue_config(dir.path(), 10, 5), &committer).await;
        for reference in references(3) {
            queue.submit(upsert(&reference)).await.unwrap();
        }
    }

    // A request file interrupted before its rename.
    let scan = scan_staging(dir.path()).unwrap();
    let batch = &scan.batches[0].path;
    std::fs::write(batch.join("000003.json.tmp"), b"{\"operation\":\"ups").unwrap();

    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 10, 5), &committer).await;
    queue.flush_ready().await.unwrap();

    assert_eq!(committer.references(), references(3));
    assert!(!batch.join("000003.json.tmp").exists());
}

#[tokio::test]
async fn test_recovery_after_partial_flush() {
    let dir = TempDir::new().unwrap();

    {
        let committer = MemoryCommitter::new();
        let queue = open_queue(queue_config(dir.path(), 5, 5), &committer).await;
        for reference in references(12) {
            queue.submit(upsert(&reference)).await.unwrap();
        }
        queue.flush_ready().await.unwrap();
        assert_eq!(committer.request_count(), 10);
    }

    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 5, 5), &committer).await;
    queue.shutdown().await.unwrap();
    assert_eq!(committer.references(), references(12)[10..].to_vec());
}

#[tokio::test]
async fn test_flush_failure_keeps_data_and_halts() {
    let dir = TempDir::new().unwrap();
    let failing = SwitchableCommitter::new(true);
    let queue = CommitQueue::open(
        queue_config(dir.path(), 2, 5),
        Box::new(failing.clone()),
        None,
    )
    .await
    .unwrap();
    queue.recover().await.unwrap();

    for reference in references(4) {
        queue.submit(upsert(&reference)).await.unwrap();
    }

    let result = queue.flush_ready().await;
    assert!(matches!(result, Err(QueueError::CommitterFlush { batch_id: 1, .. })));
    assert!(queue.is_halted());

    // Ingestion continues while flushing is halted.
    queue.submit(upsert("doc-004")).await.unwrap();
    assert!(matches!(
        queue.shutdown().await,
        Err(QueueError::FlushHalted(_))
    ));
    assert_eq!(failing.inner.request_count(), 0);
    assert_eq!(scan_staging(dir.path()).unwrap().batches.len(), 3);
    drop(queue);

    // Next session, sink is back.
    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 2, 5), &committer).await;
    queue.shutdown().await.unwrap();
    assert_eq!(committer.references(), references(5));
}

#[tokio::test]
async fn test_resume_after_sink_recovers() {
    let dir = TempDir::new().unwrap();
    let committer = SwitchableCommitter::new(true);
    let queue = CommitQueue::open(
        queue_config(dir.path(), 1, 5),
        Box::new(committer.clone()),
        None,
    )
    .await
    .unwrap();
    queue.recover().await.unwrap();

    queue.submit(upsert("a")).await.unwrap();
    assert!(queue.flush_ready().await.is_err());

    committer.set_failing(false);
    assert_eq!(queue.flush_ready().await.unwrap(), 0);
    queue.resume().await.unwrap();
    assert_eq!(queue.flush_ready().await.unwrap(), 1);
    assert_eq!(committer.inner.references(), vec!["a"]);
}

#[tokio::test]
async fn test_concurrent_submitters() {
    let dir = TempDir::new().unwrap();
    let committer = MemoryCommitter::new();
    let queue = open_queue(queue_config(dir.path(), 7, 3), &committer).await;

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                queue
                    .submit(upsert(&format!("w{}-{:02}", worker, i)))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    queue.shutdown().await.unwrap();

    let delivered = committer.references();
    assert_eq!(delivered.len(), 200);

    // Each submitter's requests arrive in the order it submitted them.
    for worker in 0..8 {
        let prefix = format!("w{}-", worker);
        let own: Vec<&String> = delivered.iter().filter(|r| r.starts_with(&prefix)).collect();
        let expected: Vec<String> = (0..25).map(|i| format!("w{}-{:02}", worker, i)).collect();
        assert_eq!(own.len(), 25);
        assert!(own.iter().zip(&expected).all(|(a, b)| *a == b));
    }
}

#[tokio::test]
async fn test_large_content_and_deletes() {
    let dir = TempDir::new().unwrap();
    let committer = MemoryCommitter::new();
    let mut config = queue_config(dir.path(), 10, 5);
    config.inline_content_limit = 64;
    let queue = open_queue(config, &committer).await;

    let body = vec![b'x'; 10_000];
    queue
        .submit(CommitterRequest::upsert(
            "big",
            Metadata::new(),
            Some(Content::Bytes(body.clone())),
        ))
        .await
        .unwrap();
    queue
        .submit(CommitterRequest::delete("gone", Metadata::new().with("reason", "404")))
        .await
        .unwrap();
    queue.shutdown().await.unwrap();

    let upserts = committer.upsert_requests();
    assert_eq!(upserts[0].content, Some(Content::Bytes(body)));
    let deletes = committer.delete_requests();
    assert_eq!(deletes[0].reference, "gone");
    assert_eq!(deletes[0].metadata.first("reason"), Some("404"));
}
