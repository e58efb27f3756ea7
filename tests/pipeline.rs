//! Batch-level tests: OCR and categorisation are scripted, everything else
//! (decoding, staging, folders, zip, cleanup) runs for real.

mod common;

use common::{
    batch_dirs, config, png_bytes, wait_for_cleanup, zip_entries, ArchiveBlockingOcr, ScriptedCategorizer,
    ScriptedOcr,
};
use notesort::pipeline::archive::{archive_entries, write_archive};
use notesort::{
    process_batch, sort_batch, sort_files, BatchProgressCallback, BatchWorkspace, CollisionPolicy,
    FileError, Pipeline, SortConfig, SortError, UploadBatch, UploadedFile, MANIFEST_FILE_NAME,
};
use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn upload(name: &str) -> UploadedFile {
    UploadedFile::new(name, png_bytes())
}

fn cats(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn file_entries(entries: &[String]) -> Vec<&str> {
    entries
        .iter()
        .map(String::as_str)
        .filter(|e| !e.ends_with('/') && *e != MANIFEST_FILE_NAME)
        .collect()
}

#[tokio::test]
async fn known_and_new_labels_scenario() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("A.png", "keep going"), ("B.png", "trip to Rome")]);
    let llm = ScriptedCategorizer::new(&[("keep going", "Motivation"), ("trip to Rome", "Travel")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm));

    let batch = UploadBatch::new(vec![upload("A.png"), upload("B.png")], cats(&["Motivation", "Study"]));
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let entries = archive_entries(&sorted.archive).unwrap();
    assert_eq!(
        entries,
        ["Motivation/", "Travel/", "Motivation/A.png", "Travel/B.png", MANIFEST_FILE_NAME]
    );
    assert_eq!(sorted.manifest.new_categories, ["Travel"]);
    assert_eq!(sorted.manifest.categories, ["Motivation", "Study", "Travel"]);
    assert!(!sorted.manifest.files[0].new_category);
    assert!(sorted.manifest.files[1].new_category);
    assert_eq!(sorted.manifest.stats.organized_files, 2);
}

#[tokio::test]
async fn label_matching_is_case_insensitive() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("a.png", "integrals")]);
    let llm = ScriptedCategorizer::new(&[("integrals", "study")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm));

    let batch = UploadBatch::new(vec![upload("a.png")], cats(&["Study", "Motivation"]));
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let entries = archive_entries(&sorted.archive).unwrap();
    assert_eq!(file_entries(&entries), ["Study/a.png"]);
    assert!(!entries.iter().any(|e| e.starts_with("study/")));
    assert!(sorted.manifest.new_categories.is_empty());
}

#[tokio::test]
async fn new_label_is_reused_by_later_files() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("1.png", "one"), ("2.png", "two")]);
    let llm = ScriptedCategorizer::new(&[("one", "Travel"), ("two", "TRAVEL")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm.clone()));

    let batch = UploadBatch::new(vec![upload("1.png"), upload("2.png")], cats(&["Study"]));
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let entries = archive_entries(&sorted.archive).unwrap();
    assert_eq!(file_entries(&entries), ["Travel/1.png", "Travel/2.png"]);
    assert_eq!(sorted.manifest.new_categories, ["Travel"]);

    // The second call is offered the category created by the first.
    let calls = llm.calls();
    assert_eq!(calls[0], ["Study"]);
    assert_eq!(calls[1], ["Study", "Travel"]);
}

#[tokio::test]
async fn undecodable_file_is_skipped_and_batch_continues() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("good.png", "plan the week")]);
    let llm = ScriptedCategorizer::new(&[("plan the week", "Planning")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm.clone()));

    let batch = UploadBatch::new(
        vec![UploadedFile::new("bad.png", b"not an image".to_vec()), upload("good.png")],
        cats(&["Planning"]),
    );
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let entries = archive_entries(&sorted.archive).unwrap();
    assert_eq!(file_entries(&entries), ["Planning/good.png"]);
    assert!(matches!(sorted.manifest.files[0].error, Some(FileError::Decode { .. })));
    assert_eq!(sorted.manifest.stats.failed_files, 1);
    assert_eq!(llm.calls().len(), 1);
}

#[tokio::test]
async fn empty_text_leaves_no_file_or_folder() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("blank.png", "   \n  ")]);
    let llm = ScriptedCategorizer::new(&[]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm.clone()));

    let batch = UploadBatch::new(vec![upload("blank.png")], cats(&["Study"]));
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    assert_eq!(archive_entries(&sorted.archive).unwrap(), [MANIFEST_FILE_NAME]);
    assert_eq!(
        sorted.manifest.files[0].error,
        Some(FileError::EmptyText { file: "blank.png".into() })
    );
    assert!(llm.calls().is_empty());
}

#[tokio::test]
async fn remote_failure_is_per_file() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("a.png", "unscripted text"), ("b.png", "focus")]);
    let llm = ScriptedCategorizer::new(&[("focus", "Motivation")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm));

    let batch = UploadBatch::new(vec![upload("a.png"), upload("b.png")], vec![]);
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let entries = archive_entries(&sorted.archive).unwrap();
    assert_eq!(file_entries(&entries), ["Motivation/b.png"]);
    match &sorted.manifest.files[0].error {
        Some(FileError::RemoteService { file, detail }) => {
            assert_eq!(file, "a.png");
            assert!(detail.contains("quota"), "got: {detail}");
        }
        other => panic!("expected RemoteService, got {other:?}"),
    }
}

#[tokio::test]
async fn path_like_label_stays_inside_tree() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("a.png", "x")]);
    let llm = ScriptedCategorizer::new(&[("x", "../../etc/passwd")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm));

    let batch = UploadBatch::new(vec![upload("a.png")], vec![]);
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let outcome = &sorted.manifest.files[0];
    assert_eq!(outcome.category.as_deref(), Some("_.._etc_passwd"));
    for entry in archive_entries(&sorted.archive).unwrap() {
        assert!(
            entry.split('/').all(|part| part != ".." && part != "."),
            "escaping entry: {entry}"
        );
    }
    assert!(!root.path().join("etc").exists());
}

#[tokio::test]
async fn client_file_name_is_reduced_to_last_component() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("../../evil.png", "x")]);
    let llm = ScriptedCategorizer::new(&[("x", "Study")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm));

    let batch = UploadBatch::new(vec![upload("../../evil.png")], vec![]);
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let entries = archive_entries(&sorted.archive).unwrap();
    assert_eq!(file_entries(&entries), ["Study/evil.png"]);
}

#[tokio::test]
async fn same_name_overwrites_by_default() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("a.png", "x")]);
    let llm = ScriptedCategorizer::new(&[("x", "Study")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm));

    let batch = UploadBatch::new(vec![upload("a.png"), upload("a.png")], vec![]);
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let entries = archive_entries(&sorted.archive).unwrap();
    assert_eq!(file_entries(&entries), ["Study/a.png"]);
    assert!(!sorted.manifest.files[0].replaced_existing);
    assert!(sorted.manifest.files[1].replaced_existing);
}

#[tokio::test]
async fn rename_policy_keeps_both_files() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("a.png", "x")]);
    let llm = ScriptedCategorizer::new(&[("x", "Study")]);
    let mut cfg = config(root.path(), ocr, llm);
    cfg.collision = CollisionPolicy::Rename;
    let pipeline = Pipeline::new(cfg);

    let batch = UploadBatch::new(vec![upload("a.png"), upload("a.png")], vec![]);
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let entries = archive_entries(&sorted.archive).unwrap();
    assert_eq!(file_entries(&entries), ["Study/a (1).png", "Study/a.png"]);
    assert_eq!(sorted.manifest.files[1].stored_name.as_deref(), Some("a (1).png"));
}

#[tokio::test]
async fn category_cap_routes_overflow_to_fallback() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("1.png", "one"), ("2.png", "two")]);
    let llm = ScriptedCategorizer::new(&[("one", "Travel"), ("two", "Cooking")]);
    let mut cfg = config(root.path(), ocr, llm);
    cfg.max_categories = 2;
    let pipeline = Pipeline::new(cfg);

    let batch = UploadBatch::new(vec![upload("1.png"), upload("2.png")], cats(&["Study"]));
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let entries = archive_entries(&sorted.archive).unwrap();
    assert_eq!(file_entries(&entries), ["Other/2.png", "Travel/1.png"]);
}

#[tokio::test]
async fn concurrent_batches_are_isolated() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("left.png", "l"), ("right.png", "r")]);
    let llm = ScriptedCategorizer::new(&[("l", "Left"), ("r", "Right")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm));

    let (a, b) = tokio::join!(
        sort_batch(&pipeline, UploadBatch::new(vec![upload("left.png")], vec![])),
        sort_batch(&pipeline, UploadBatch::new(vec![upload("right.png")], vec![])),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.archive, b.archive);
    assert_eq!(file_entries(&archive_entries(&a.archive).unwrap()), ["Left/left.png"]);
    assert_eq!(file_entries(&archive_entries(&b.archive).unwrap()), ["Right/right.png"]);

    a.finish().await;
    assert!(b.archive.exists(), "finishing one batch must not touch another");
}

#[tokio::test]
async fn finish_removes_the_batch_and_keeps_work_root() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(config(root.path(), ScriptedOcr::new(&[]), ScriptedCategorizer::new(&[])));

    let sorted = sort_batch(&pipeline, UploadBatch::default()).await.unwrap();
    assert_eq!(batch_dirs(root.path()).len(), 1);

    let manifest = sorted.finish().await;
    assert!(manifest.files.is_empty());
    assert!(batch_dirs(root.path()).is_empty());
    assert!(root.path().is_dir());
}

#[tokio::test]
async fn dropping_a_sorted_batch_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(config(root.path(), ScriptedOcr::new(&[]), ScriptedCategorizer::new(&[])));

    let sorted = sort_batch(&pipeline, UploadBatch::default()).await.unwrap();
    drop(sorted);
    assert!(wait_for_cleanup(root.path()).await);
}

#[tokio::test]
async fn archive_failure_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("a.png", "x")]);
    let llm = ScriptedCategorizer::new(&[("x", "Study")]);
    let cfg = config(root.path(), ocr, llm);
    let pipeline = Pipeline::new(cfg.clone());

    let ws = BatchWorkspace::create(&cfg).await.unwrap();
    let manifest = process_batch(&pipeline, &ws, UploadBatch::new(vec![upload("a.png")], vec![])).await;
    assert_eq!(manifest.stats.organized_files, 1);

    // A directory where the archive should go makes the write fail.
    std::fs::create_dir(ws.archive_path()).unwrap();
    let err = write_archive(&ws, Some(&manifest)).await.unwrap_err();
    assert!(matches!(err, SortError::Archive { .. }), "got: {err}");
}

#[tokio::test]
async fn archive_failure_still_removes_the_batch() {
    let root = tempfile::tempdir().unwrap();
    let ocr = Arc::new(ArchiveBlockingOcr { text: "x" });
    let llm = ScriptedCategorizer::new(&[("x", "Study")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm));

    let batch = UploadBatch::new(vec![upload("a.png"), upload("b.png")], cats(&["Study"]));
    let err = sort_batch(&pipeline, batch).await.unwrap_err();
    assert!(matches!(err, SortError::Archive { .. }), "got: {err}");

    assert!(wait_for_cleanup(root.path()).await, "batch directory left behind");
    assert!(root.path().is_dir());
}

#[tokio::test]
async fn manifest_in_archive_matches_returned_manifest() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("a.png", "x")]);
    let llm = ScriptedCategorizer::new(&[("x", "Study")]);
    let pipeline = Pipeline::new(config(root.path(), ocr, llm));

    let batch = UploadBatch::new(
        vec![upload("a.png"), UploadedFile::new("b.png", b"junk".to_vec())],
        vec![],
    );
    let sorted = sort_batch(&pipeline, batch).await.unwrap();

    let mut zip = zip::ZipArchive::new(File::open(&sorted.archive).unwrap()).unwrap();
    let stored: notesort::BatchManifest =
        serde_json::from_reader(zip.by_name(MANIFEST_FILE_NAME).unwrap()).unwrap();
    assert_eq!(stored.batch_id, sorted.manifest.batch_id);
    assert_eq!(stored.files.len(), 2);
    assert_eq!(stored.files[0].archive_path().as_deref(), Some("Study/a.png"));
    assert_eq!(stored.failures().count(), 1);
}

#[tokio::test]
async fn manifest_can_be_left_out() {
    let root = tempfile::tempdir().unwrap();
    let mut cfg = config(root.path(), ScriptedOcr::new(&[]), ScriptedCategorizer::new(&[]));
    cfg.include_manifest = false;
    let sorted = sort_batch(&Pipeline::new(cfg), UploadBatch::default()).await.unwrap();
    assert!(archive_entries(&sorted.archive).unwrap().is_empty());
}

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    finished_ok: AtomicUsize,
}

impl BatchProgressCallback for Counting {
    fn on_file_start(&self, _index: usize, _total: usize, _file_name: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_complete(&self, _index: usize, _total: usize, _file_name: &str, _category: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_error(&self, _index: usize, _total: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _total: usize, success_count: usize) {
        self.finished_ok.store(success_count, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_file() {
    let root = tempfile::tempdir().unwrap();
    let ocr = ScriptedOcr::new(&[("a.png", "x")]);
    let llm = ScriptedCategorizer::new(&[("x", "Study")]);
    let counter = Arc::new(Counting::default());
    let mut cfg = config(root.path(), ocr, llm);
    cfg.progress_callback = Some(counter.clone());

    let batch = UploadBatch::new(
        vec![upload("a.png"), UploadedFile::new("b.png", b"junk".to_vec())],
        vec![],
    );
    sort_batch(&Pipeline::new(cfg), batch).await.unwrap();

    assert_eq!(counter.started.load(Ordering::SeqCst), 2);
    assert_eq!(counter.completed.load(Ordering::SeqCst), 1);
    assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
    assert_eq!(counter.finished_ok.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sort_files_writes_archive_and_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let inputs_dir = tempfile::tempdir().unwrap();
    let input = inputs_dir.path().join("page.png");
    std::fs::write(&input, png_bytes()).unwrap();

    let cfg = config(
        root.path(),
        ScriptedOcr::new(&[("page.png", "x")]),
        ScriptedCategorizer::new(&[("x", "Study")]),
    );
    let output = inputs_dir.path().join("out/notes.zip");
    let manifest = sort_files(&[input.to_str().unwrap()], &cats(&["Study"]), &output, &cfg)
        .await
        .unwrap();

    assert_eq!(manifest.stats.organized_files, 1);
    let entries = zip_entries(File::open(&output).unwrap());
    assert!(entries.contains(&"Study/page.png".to_string()));
    assert!(batch_dirs(root.path()).is_empty());
}

#[tokio::test]
async fn sort_files_rejects_missing_input() {
    let root = tempfile::tempdir().unwrap();
    let cfg = SortConfig::builder().work_dir(root.path()).build().unwrap();
    let err = sort_files(&["/no/such/page.png"], &[], root.path().join("x.zip"), &cfg)
        .await
        .unwrap_err();
    assert!(matches!(err, SortError::InputNotFound { .. }), "got: {err}");
}

#[test]
fn sort_files_sync_runs_without_a_runtime() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("page.png");
    std::fs::write(&input, png_bytes()).unwrap();
    let cfg = config(
        &root.path().join("work"),
        ScriptedOcr::new(&[("page.png", "x")]),
        ScriptedCategorizer::new(&[("x", "Study")]),
    );

    let output = root.path().join("notes.zip");
    let manifest =
        notesort::sort_files_sync(&[input.to_str().unwrap()], &[], &output, &cfg).unwrap();
    assert_eq!(manifest.files[0].category.as_deref(), Some("Study"));
    assert!(output.is_file());
}
