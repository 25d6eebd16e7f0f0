//! Per-file conversion state.

use serde::Serialize;
use std::path::PathBuf;

use crate::error::ConvertError;

/// Stable identity of a record. Survives rescans as long as the file
/// stays present, so observers can track a file across snapshots.
pub type RecordId = u64;

/// Conversion status of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One convertible file and everything known about it.
///
/// Records are owned and mutated exclusively by the directory actor;
/// everyone else sees clones.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: RecordId,
    pub path: PathBuf,
    pub selected: bool,
    /// Last observed modification time, epoch milliseconds.
    pub last_modified: i64,
    /// When the last successful conversion finished; 0 means never.
    pub last_converted: i64,
    pub status: FileStatus,
    /// Fraction of the current run completed, in `[0, 1]`.
    pub progress: f64,
    /// Rendered failure text of the last attempt; empty when clean.
    pub error_text: String,
}

impl FileRecord {
    pub fn new(id: RecordId, path: PathBuf, last_modified: i64) -> Self {
        Self {
            id,
            path,
            selected: true,
            last_modified,
            last_converted: 0,
            status: FileStatus::Pending,
            progress: 0.0,
            error_text: String::new(),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether the file changed since it was last converted.
    pub fn needs_convert(&self) -> bool {
        self.last_converted <= self.last_modified
    }

    /// Registers a modification. A prior success goes back to pending;
    /// running and failed states are left as they are.
    pub fn on_modified(&mut self, timestamp: i64) {
        self.last_modified = timestamp;
        if self.status == FileStatus::Succeeded {
            self.status = FileStatus::Pending;
        }
    }

    /// Moves into the running state. Returns false when a run is already
    /// in flight, in which case nothing changes.
    pub fn begin_run(&mut self) -> bool {
        if self.status == FileStatus::Running {
            return false;
        }
        self.status = FileStatus::Running;
        self.progress = 0.0;
        self.error_text.clear();
        true
    }

    pub fn set_progress(&mut self, progress: f64) {
        self.progress = progress.clamp(0.0, 1.0);
    }

    pub fn finish_success(&mut self, timestamp: i64) {
        self.status = FileStatus::Succeeded;
        self.progress = 1.0;
        self.last_converted = timestamp;
        self.error_text.clear();
    }

    /// Records a conversion failure; the rendered error is kept verbatim.
    pub fn finish_failure(&mut self, error: &ConvertError) {
        self.status = FileStatus::Failed;
        self.error_text = error.to_string();
    }

    /// Records a failure that did not come from the pipeline, such as a
    /// panicked worker.
    pub fn finish_unexpected(&mut self, message: &str) {
        self.status = FileStatus::Failed;
        self.error_text = format!("{}: {message}", self.file_name());
    }

    pub fn finish_cancelled(&mut self) {
        let error = ConvertError::cancelled(&self.path);
        self.finish_failure(&error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Location};

    fn record() -> FileRecord {
        FileRecord::new(1, PathBuf::from("/in/items.xlsx"), 100)
    }

    #[test]
    fn test_new_record_is_selected_and_pending() {
        let r = record();
        assert!(r.selected);
        assert_eq!(r.status, FileStatus::Pending);
        assert_eq!(r.last_converted, 0);
        assert!(r.needs_convert());
    }

    #[test]
    fn test_success_then_modify_goes_back_to_pending() {
        let mut r = record();
        assert!(r.begin_run());
        r.finish_success(200);
        assert_eq!(r.status, FileStatus::Succeeded);
        assert!(!r.needs_convert());

        r.on_modified(300);
        assert_eq!(r.status, FileStatus::Pending);
        assert!(r.needs_convert());
    }

    #[test]
    fn test_modify_does_not_demote_failed() {
        let mut r = record();
        r.begin_run();
        let err = ConvertError::new(
            ErrorKind::TypeParse,
            "/in/items.xlsx",
            Location::sheet("S").at_row(3),
            "bad cell",
        );
        r.finish_failure(&err);
        r.on_modified(300);
        assert_eq!(r.status, FileStatus::Failed);
    }

    #[test]
    fn test_begin_run_refused_while_running() {
        let mut r = record();
        assert!(r.begin_run());
        assert!(!r.begin_run());
        assert_eq!(r.status, FileStatus::Running);
    }

    #[test]
    fn test_failed_record_can_rerun() {
        let mut r = record();
        r.begin_run();
        r.finish_unexpected("worker panicked");
        assert_eq!(r.status, FileStatus::Failed);
        assert_eq!(r.error_text, "items.xlsx: worker panicked");

        assert!(r.begin_run());
        assert!(r.error_text.is_empty());
    }

    #[test]
    fn test_failure_text_is_rendered_error_verbatim() {
        let mut r = record();
        r.begin_run();
        let err = ConvertError::new(
            ErrorKind::Validation,
            "/in/items.xlsx",
            Location::sheet("Main").at_row(9).at_column("price"),
            "must be positive",
        );
        r.finish_failure(&err);
        assert_eq!(
            r.error_text,
            "[items.xlsx #Main row 9 col price]: must be positive"
        );
    }

    #[test]
    fn test_cancelled_run_is_failed_with_message() {
        let mut r = record();
        r.begin_run();
        r.finish_cancelled();
        assert_eq!(r.status, FileStatus::Failed);
        assert_eq!(r.error_text, "[items.xlsx]: conversion cancelled");
    }

    #[test]
    fn test_equal_timestamps_still_need_convert() {
        let mut r = record();
        r.begin_run();
        r.finish_success(100);
        r.last_modified = 100;
        // A conversion in the same millisecond as the modification does
        // not prove the converted output is current.
        assert!(r.needs_convert());
    }
}
