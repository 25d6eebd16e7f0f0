//! End-to-end flows through the directory converter, driven over real
//! temporary directories.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use conftable_core::config::ConvertOptions;
use conftable_core::directory::{DirectoryConverter, DirectorySnapshot};
use conftable_core::record::FileStatus;

struct TestHarness {
    input: TempDir,
    output: TempDir,
    converter: DirectoryConverter,
}

impl TestHarness {
    fn new(options: ConvertOptions) -> Self {
        Self {
            input: TempDir::new().expect("input dir"),
            output: TempDir::new().expect("output dir"),
            converter: DirectoryConverter::new(options),
        }
    }

    fn write_input(&self, name: &str, content: &str) -> PathBuf {
        let path = self.input.path().join(name);
        std::fs::write(&path, content).expect("write input file");
        path
    }

    async fn open(&self) {
        self.converter
            .open(self.input.path(), self.output.path())
            .await
            .expect("open directory pair");
    }

    async fn snapshot(&self) -> DirectorySnapshot {
        self.converter.snapshot().await.expect("snapshot")
    }

    /// Polls until the snapshot satisfies the predicate; for flows that
    /// settle through the watcher rather than a batch handle.
    async fn wait_for(
        &self,
        what: &str,
        predicate: impl Fn(&DirectorySnapshot) -> bool,
    ) -> DirectorySnapshot {
        for _ in 0..200 {
            let snapshot = self.snapshot().await;
            if predicate(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("timed out waiting for {what}: {:?}", self.snapshot().await);
    }
}

#[tokio::test]
async fn test_open_lists_convertible_files() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("items.xlsx", "placeholder");
    h.write_input("~items.xlsx", "temp copy");
    h.write_input("readme.txt", "not a table");
    h.write_input("__enums.lua", "return {}");
    h.open().await;

    let snapshot = h.snapshot().await;
    let mut names: Vec<String> = snapshot.records.iter().map(|r| r.file_name()).collect();
    names.sort();
    assert_eq!(names, vec!["__enums.lua", "items.xlsx"]);
    assert!(snapshot.records.iter().all(|r| r.selected));
    assert!(snapshot
        .records
        .iter()
        .all(|r| r.status == FileStatus::Pending));
    assert_eq!(snapshot.filtered.len(), 2);
    assert_eq!(snapshot.validation_status, "");
}

#[tokio::test]
async fn test_enum_job_converts_and_validates() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("__enums.lua", "return { color = { red = 1 } }");
    h.open().await;

    let summary = h
        .converter
        .convert_selected()
        .await
        .expect("submit batch")
        .wait()
        .await
        .expect("batch settles");
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.succeeded, 1);

    let written = std::fs::read_to_string(h.input.path().join("enums.lua")).expect("enums.lua");
    assert!(written.contains("red = 1"));

    let snapshot = h.snapshot().await;
    let record = snapshot.record("__enums.lua").expect("enum record");
    assert_eq!(record.status, FileStatus::Succeeded);
    assert_eq!(record.progress, 1.0);
    assert!(record.error_text.is_empty());
    // No __validate_all.lua counts as a pass.
    assert!(snapshot.validation_status.starts_with("S "));
    assert!(!snapshot.validation_pending);
}

#[tokio::test]
async fn test_failures_are_independent_and_located() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("__enums.lua", "return nil .. 1");
    h.write_input("a.xlsx", "not a real workbook");
    h.write_input("b.xlsx", "also not a workbook");
    h.open().await;

    let summary = h
        .converter
        .convert_selected()
        .await
        .expect("submit batch")
        .wait()
        .await
        .expect("batch settles");
    assert_eq!(summary.submitted, 3);
    assert_eq!(summary.succeeded, 0);

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.status_counts().failed, 3);
    let enums = snapshot.record("__enums.lua").expect("enum record");
    let a = snapshot.record("a.xlsx").expect("a record");
    let b = snapshot.record("b.xlsx").expect("b record");
    assert!(enums.error_text.starts_with("[__enums.lua]:"));
    assert!(a.error_text.starts_with("[a.xlsx]:"));
    assert!(b.error_text.starts_with("[b.xlsx]:"));
    // Nothing succeeded, so no validation was owed.
    assert_eq!(snapshot.validation_status, "");
}

#[tokio::test]
async fn test_failing_validation_reported_after_batch() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("__enums.lua", "return {}");
    h.write_input("__validate_all.lua", "return 'cross-file totals broken'");
    h.open().await;

    h.converter
        .convert_selected()
        .await
        .expect("submit batch")
        .wait()
        .await
        .expect("batch settles");

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.validation_status, "E cross-file totals broken");
}

#[tokio::test]
async fn test_validation_deferred_when_disabled() {
    let h = TestHarness::new(ConvertOptions::default().with_auto_validate_all(false));
    h.write_input("__enums.lua", "return {}");
    h.open().await;

    h.converter
        .convert_selected()
        .await
        .expect("submit batch")
        .wait()
        .await
        .expect("batch settles");

    let snapshot = h.snapshot().await;
    assert!(snapshot.validation_pending);
    assert_eq!(snapshot.validation_status, "");

    // An explicit run clears the debt.
    let status = h.converter.validate_all().await.expect("validate");
    assert!(status.starts_with("S "));
    let snapshot = h.snapshot().await;
    assert!(!snapshot.validation_pending);
    assert_eq!(snapshot.validation_status, status);
}

#[tokio::test]
async fn test_rescan_preserves_record_identity() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("a.xlsx", "x");
    h.write_input("b.xlsx", "x");
    h.open().await;

    let before = h.snapshot().await;
    let a_id = before.record("a.xlsx").expect("a").id;
    let b_id = before.record("b.xlsx").expect("b").id;

    h.converter
        .toggle_record(b_id)
        .await
        .expect("toggle record");
    h.write_input("c.xlsx", "x");
    std::fs::remove_file(h.input.path().join("a.xlsx")).expect("remove a");
    h.converter.rescan().await.expect("rescan");

    let after = h.snapshot().await;
    assert!(after.record("a.xlsx").is_none());
    let b = after.record("b.xlsx").expect("b kept");
    assert_eq!(b.id, b_id);
    assert!(!b.selected, "selection survives rescan");
    let c = after.record("c.xlsx").expect("c added");
    assert_ne!(c.id, a_id);
    assert_ne!(c.id, b_id);
}

#[tokio::test]
async fn test_filter_limits_view_and_batches() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("__enums.lua", "return {}");
    h.write_input("weapons.xlsx", "x");
    h.open().await;

    h.converter.set_filter("weapons").await.expect("set filter");
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.filtered.len(), 1);
    let weapons_id = snapshot.record("weapons.xlsx").expect("weapons").id;
    assert_eq!(snapshot.filtered, vec![weapons_id]);

    // Filter is case sensitive.
    h.converter.set_filter("Weapons").await.expect("set filter");
    let snapshot = h.snapshot().await;
    assert!(snapshot.filtered.is_empty());

    let summary = h
        .converter
        .convert_selected()
        .await
        .expect("submit batch")
        .wait()
        .await
        .expect("batch settles");
    assert_eq!(summary.submitted, 0);
    let snapshot = h.snapshot().await;
    assert_eq!(
        snapshot.record("__enums.lua").expect("enum record").status,
        FileStatus::Pending
    );
}

#[tokio::test]
async fn test_deselected_records_are_skipped() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("__enums.lua", "return {}");
    h.open().await;

    h.converter.deselect_all().await.expect("deselect");
    let summary = h
        .converter
        .convert_selected()
        .await
        .expect("submit batch")
        .wait()
        .await
        .expect("batch settles");
    assert_eq!(summary.submitted, 0);

    h.converter.select_all().await.expect("select");
    let summary = h
        .converter
        .convert_selected()
        .await
        .expect("submit batch")
        .wait()
        .await
        .expect("batch settles");
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_toggle_selection_inverts_every_record() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("a.xlsx", "x");
    h.write_input("b.xlsx", "x");
    h.open().await;

    let a_id = h.snapshot().await.record("a.xlsx").expect("a").id;
    h.converter.toggle_record(a_id).await.expect("toggle a");
    h.converter.toggle_selection().await.expect("invert all");

    let snapshot = h.snapshot().await;
    assert!(snapshot.record("a.xlsx").expect("a").selected);
    assert!(!snapshot.record("b.xlsx").expect("b").selected);
}

#[tokio::test]
async fn test_only_failed_toggle() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("__enums.lua", "return {}");
    h.open().await;

    h.converter
        .set_only_failed(true)
        .await
        .expect("set only_failed");
    let summary = h
        .converter
        .convert_selected()
        .await
        .expect("submit batch")
        .wait()
        .await
        .expect("batch settles");
    assert_eq!(summary.submitted, 0, "nothing has failed yet");
}

#[tokio::test]
async fn test_converting_twice_skips_unchanged_with_only_updated() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("__enums.lua", "return {}");
    h.open().await;

    let first = h
        .converter
        .convert_selected()
        .await
        .expect("submit")
        .wait()
        .await
        .expect("settles");
    assert_eq!(first.succeeded, 1);

    h.converter
        .set_only_updated(true)
        .await
        .expect("set only_updated");
    let second = h
        .converter
        .convert_selected()
        .await
        .expect("submit")
        .wait()
        .await
        .expect("settles");
    assert_eq!(second.submitted, 0, "unchanged file is skipped");
}

#[tokio::test]
async fn test_watcher_picks_up_new_file() {
    let h = TestHarness::new(ConvertOptions::default());
    h.open().await;

    h.write_input("late.xlsx", "x");
    let snapshot = h
        .wait_for("watcher to add the record", |s| {
            s.record("late.xlsx").is_some()
        })
        .await;
    let record = snapshot.record("late.xlsx").expect("late record");
    assert_eq!(record.status, FileStatus::Pending);
    assert!(record.selected);
}

#[tokio::test]
async fn test_auto_convert_on_watcher_event() {
    let h = TestHarness::new(ConvertOptions::default().with_auto_convert(true));
    h.open().await;

    h.write_input("__enums.lua", "return { size = { s = 1 } }");
    h.wait_for("auto conversion to finish", |s| {
        s.record("__enums.lua")
            .map(|r| r.status == FileStatus::Succeeded)
            .unwrap_or(false)
    })
    .await;
    let written = std::fs::read_to_string(h.input.path().join("enums.lua")).expect("enums.lua");
    assert!(written.contains("s = 1"));
}

#[tokio::test]
async fn test_enabling_auto_convert_converts_modified() {
    let h = TestHarness::new(ConvertOptions::default());
    h.write_input("__enums.lua", "return {}");
    h.open().await;

    h.converter
        .set_auto_convert(true)
        .await
        .expect("enable auto convert");
    h.wait_for("pending file to convert", |s| {
        s.record("__enums.lua")
            .map(|r| r.status == FileStatus::Succeeded)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn test_shutdown_closes_handle() {
    let h = TestHarness::new(ConvertOptions::default());
    h.open().await;
    h.converter.shutdown().await.expect("shutdown");
    assert!(h.converter.snapshot().await.is_err());
}
