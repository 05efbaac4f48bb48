use std::sync::Arc;
use sumi_sift::checksum::{ChecksumStore, MemoryChecksumStore, SqliteChecksumStore};
use sumi_sift::config::parse_config;
use sumi_sift::document::{DocState, DocumentRecord, FetchPhase, Metadata};
use sumi_sift::Pipeline;
use tempfile::TempDir;

fn pipeline(toml: &str, store: Arc<dyn ChecksumStore>) -> Pipeline {
    let config = parse_config(&format!("{}\n[queue]\ndirectory = \"./queue\"\n", toml)).unwrap();
    Pipeline::from_config(&config, store).unwrap()
}

fn memory() -> Arc<dyn ChecksumStore> {
    Arc::new(MemoryChecksumStore::new())
}

fn record(reference: &str, fields: &[(&str, &str)]) -> DocumentRecord {
    let metadata: Metadata = fields.iter().copied().collect();
    DocumentRecord::new(reference).with_metadata(metadata)
}

#[test]
fn test_first_matching_rule_wins() {
    let pipeline = pipeline(
        r#"
[[metadata-filter]]
field = { pattern = "A" }
value = { pattern = "x" }
on-match = "exclude"

[[metadata-filter]]
field = { pattern = "B" }
value = { pattern = "y" }
on-match = "include"
"#,
        memory(),
    );

    let mut both = record("both", &[("A", "x"), ("B", "y")]);
    assert_eq!(pipeline.evaluate(&mut both, FetchPhase::Document), DocState::Rejected);

    let mut only_b = record("only-b", &[("B", "y")]);
    assert_eq!(pipeline.evaluate(&mut only_b, FetchPhase::Document), DocState::New);
}

#[test]
fn test_reversed_rule_order_accepts() {
    let pipeline = pipeline(
        r#"
[[metadata-filter]]
field = { pattern = "B" }
value = { pattern = "y" }
on-match = "include"

[[metadata-filter]]
field = { pattern = "A" }
value = { pattern = "x" }
on-match = "exclude"
"#,
        memory(),
    );

    let mut both = record("both", &[("A", "x"), ("B", "y")]);
    assert_eq!(pipeline.evaluate(&mut both, FetchPhase::Document), DocState::New);
}

#[test]
fn test_no_match_default_is_configurable() {
    let rules = r#"
[[metadata-filter]]
field = { pattern = "Content-Type" }
value = { pattern = "text/*", method = "wildcard" }
on-match = "include"
"#;

    let accepting = pipeline(rules, memory());
    let rejecting = pipeline(&format!("[pipeline]\non-no-match = \"reject\"\n{}", rules), memory());

    let mut image = record("img", &[("Content-Type", "image/png")]);
    assert_eq!(accepting.evaluate(&mut image, FetchPhase::Metadata), DocState::New);

    let mut image = record("img", &[("Content-Type", "image/png")]);
    assert_eq!(rejecting.evaluate(&mut image, FetchPhase::Metadata), DocState::Rejected);

    let mut html = record("page", &[("Content-Type", "text/html")]);
    assert_eq!(rejecting.evaluate(&mut html, FetchPhase::Metadata), DocState::New);
}

#[test]
fn test_content_filter_needs_document_phase() {
    let pipeline = pipeline(
        r#"
[[content-filter]]
value = { pattern = "lorem", method = "regex", ignore-case = true, partial = true }
on-match = "exclude"
"#,
        memory(),
    );

    let mut doc = DocumentRecord::new("page").with_content("Lorem ipsum dolor");
    assert_eq!(pipeline.evaluate(&mut doc, FetchPhase::Metadata), DocState::New);
    assert_eq!(pipeline.evaluate(&mut doc, FetchPhase::Document), DocState::Rejected);

    let mut clean = DocumentRecord::new("other").with_content("Nothing to see");
    assert_eq!(pipeline.evaluate(&mut clean, FetchPhase::Document), DocState::New);
}

#[test]
fn test_content_rules_match_anywhere_by_default() {
    let pipeline = pipeline(
        r#"
[[content-filter]]
value = { pattern = "(?i)lorem", method = "regex" }
on-match = "exclude"

[[content-filter]]
value = { pattern = "*DRAFT*", method = "wildcard" }
on-match = "exclude"
"#,
        memory(),
    );

    let body = "<html>\n<p>Some Lorem ipsum text</p>\n</html>\n";
    let mut lorem = DocumentRecord::new("lorem").with_content(body);
    assert_eq!(pipeline.evaluate(&mut lorem, FetchPhase::Document), DocState::Rejected);

    let mut draft = DocumentRecord::new("draft").with_content("title\nDRAFT\nbody");
    assert_eq!(pipeline.evaluate(&mut draft, FetchPhase::Document), DocState::Rejected);

    let mut clean = DocumentRecord::new("clean").with_content("title\nfinal\nbody");
    assert_eq!(pipeline.evaluate(&mut clean, FetchPhase::Document), DocState::New);
}

#[test]
fn test_content_rule_can_require_whole_text() {
    let pipeline = pipeline(
        r#"
[[content-filter]]
value = { pattern = "lorem", partial = false }
on-match = "exclude"
"#,
        memory(),
    );

    let mut exact = DocumentRecord::new("exact").with_content("lorem");
    assert_eq!(pipeline.evaluate(&mut exact, FetchPhase::Document), DocState::Rejected);

    let mut longer = DocumentRecord::new("longer").with_content("lorem ipsum");
    assert_eq!(pipeline.evaluate(&mut longer, FetchPhase::Document), DocState::New);
}

#[test]
fn test_metadata_checksum_survives_store_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("checksums.db");
    let checksum = r#"
[checksum]
field = { pattern = "ETag" }
"#;

    let signature = {
        let store: Arc<dyn ChecksumStore> = Arc::new(SqliteChecksumStore::open(&db).unwrap());
        let pipeline = pipeline(checksum, store.clone());
        let mut doc = record("page", &[("ETag", "v1"), ("Date", "Mon")]);
        assert_eq!(pipeline.evaluate(&mut doc, FetchPhase::Metadata), DocState::New);

        // Classification alone never writes the store.
        assert_eq!(store.get("page").unwrap(), None);
        doc.new_checksum.unwrap()
    };

    let store: Arc<dyn ChecksumStore> = Arc::new(SqliteChecksumStore::open(&db).unwrap());
    store.put("page", &signature).unwrap();
    let pipeline = pipeline(checksum, store.clone());

    // Fields outside the matcher do not affect the signature.
    let mut same = record("page", &[("ETag", "v1"), ("Date", "Tue")]);
    assert_eq!(pipeline.evaluate(&mut same, FetchPhase::Metadata), DocState::Unmodified);

    let mut changed = record("page", &[("ETag", "v2"), ("Date", "Tue")]);
    assert_eq!(pipeline.evaluate(&mut changed, FetchPhase::Metadata), DocState::Modified);
    assert_eq!(changed.prior_checksum.as_deref(), Some(signature.as_str()));
}

#[test]
fn test_default_checksum_field_is_last_modified() {
    let store = memory();
    let pipeline = pipeline("[checksum]\n", store.clone());

    let mut doc = record("page", &[("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")]);
    assert_eq!(pipeline.evaluate(&mut doc, FetchPhase::Metadata), DocState::New);
    store.put("page", doc.new_checksum.as_deref().unwrap()).unwrap();

    let mut again = record("page", &[("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")]);
    assert_eq!(pipeline.evaluate(&mut again, FetchPhase::Metadata), DocState::Unmodified);

    // Without the field there is nothing to compare, so the document is new.
    let mut bare = record("page", &[("Content-Type", "text/html")]);
    assert_eq!(pipeline.evaluate(&mut bare, FetchPhase::Metadata), DocState::New);
    assert_eq!(bare.new_checksum, None);
}

#[test]
fn test_content_checksum() {
    let store = memory();
    let pipeline = pipeline("[checksum]\nuse-content = true\n", store.clone());

    let mut doc = DocumentRecord::new("page").with_content("body v1");
    assert_eq!(pipeline.evaluate(&mut doc, FetchPhase::Document), DocState::New);
    store.put("page", doc.new_checksum.as_deref().unwrap()).unwrap();

    let mut same = DocumentRecord::new("page").with_content("body v1");
    assert_eq!(pipeline.evaluate(&mut same, FetchPhase::Document), DocState::Unmodified);

    let mut changed = DocumentRecord::new("page").with_content("body v2");
    assert_eq!(pipeline.evaluate(&mut changed, FetchPhase::Document), DocState::Modified);
}

#[test]
fn test_terminal_states_are_from_the_known_set() {
    let pipeline = pipeline(
        r#"
[[metadata-filter]]
field = { pattern = "status" }
value = { pattern = "draft" }
on-match = "exclude"

[checksum]
use-content = true
"#,
        memory(),
    );

    let mut records = vec![
        record("draft", &[("status", "draft")]),
        DocumentRecord::new("no-body"),
        DocumentRecord::new("with-body").with_content("hello"),
        DocumentRecord::deleted("gone", Metadata::new()),
    ];

    let states: Vec<DocState> = records
        .iter_mut()
        .map(|r| pipeline.evaluate(r, FetchPhase::Document))
        .collect();
    assert_eq!(
        states,
        vec![DocState::Rejected, DocState::Error, DocState::New, DocState::Deleted]
    );
}
