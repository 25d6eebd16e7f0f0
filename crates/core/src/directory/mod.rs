//! Directory conversion orchestration.
//!
//! A [`DirectoryConverter`] is a handle to a single actor task that owns
//! all mutable state: the record collection, the filtered view, the
//! toggles and the filesystem watcher. Commands, watcher events and job
//! completions all funnel through one channel and are applied in arrival
//! order, so there is exactly one writer and no locking.

mod actor;
mod validate;
mod watcher;

pub use validate::{run_validate_all, VALIDATION_RUNNING};

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::ConvertOptions;
use crate::record::{FileRecord, FileStatus, RecordId};

use actor::{Actor, ConvertTarget, Msg};

/// Why a command could not be carried out.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory converter is shut down")]
    Closed,

    #[error("no directory is open")]
    NotOpen,

    #[error("batch coordination was interrupted")]
    Interrupted,

    #[error("could not list directory: {0}")]
    List(String),
}

/// State changes broadcast to observers. Records are identified by path;
/// the details come from the next [`DirectoryConverter::snapshot`].
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    CollectionReplaced,
    RecordAdded(PathBuf),
    RecordRemoved(PathBuf),
    RecordUpdated(PathBuf),
    FilterChanged,
    SettingsChanged,
    ValidationChanged,
}

/// Full observable state at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct DirectorySnapshot {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub options: ConvertOptions,
    /// `P ...` while running, `S <timestamp>` after a pass,
    /// `E <message>` after a failure, empty before the first run.
    pub validation_status: String,
    /// Whether a validation run is owed but deferred.
    pub validation_pending: bool,
    pub records: Vec<FileRecord>,
    /// Ids of the records matching the current filter, in record order.
    pub filtered: Vec<RecordId>,
}

impl DirectorySnapshot {
    pub fn record(&self, name: &str) -> Option<&FileRecord> {
        self.records.iter().find(|r| r.file_name() == name)
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in &self.records {
            match record.status {
                FileStatus::Pending => counts.pending += 1,
                FileStatus::Running => counts.running += 1,
                FileStatus::Succeeded => counts.succeeded += 1,
                FileStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// What a finished batch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub submitted: usize,
    pub succeeded: usize,
}

/// Resolves when a conversion batch has fully settled, including the
/// post-batch validation when it runs automatically.
pub struct BatchHandle {
    rx: oneshot::Receiver<BatchSummary>,
}

impl BatchHandle {
    pub(crate) fn new(rx: oneshot::Receiver<BatchSummary>) -> Self {
        Self { rx }
    }

    pub async fn wait(self) -> Result<BatchSummary, DirectoryError> {
        self.rx.await.map_err(|_| DirectoryError::Interrupted)
    }
}

/// Cloneable handle to the directory actor.
#[derive(Clone)]
pub struct DirectoryConverter {
    tx: mpsc::UnboundedSender<Msg>,
    events: broadcast::Sender<ChangeEvent>,
}

impl DirectoryConverter {
    /// Starts the actor with the given behavior toggles.
    pub fn new(options: ConvertOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let actor = Actor::new(rx, tx.clone(), events.clone(), options);
        tokio::spawn(actor.run());
        Self { tx, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Opens a directory pair, replacing any previous collection.
    pub async fn open(
        &self,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<(), DirectoryError> {
        let (ack, rx) = oneshot::channel();
        self.send(Msg::Open {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            ack,
        })?;
        rx.await.map_err(|_| DirectoryError::Closed)?
    }

    /// Re-lists the open directory, preserving records whose file is
    /// still present.
    pub async fn rescan(&self) -> Result<(), DirectoryError> {
        let (ack, rx) = oneshot::channel();
        self.send(Msg::Rescan { ack })?;
        rx.await.map_err(|_| DirectoryError::Closed)?
    }

    pub async fn select_all(&self) -> Result<(), DirectoryError> {
        self.acked(|ack| Msg::SelectAll { ack }).await
    }

    pub async fn deselect_all(&self) -> Result<(), DirectoryError> {
        self.acked(|ack| Msg::DeselectAll { ack }).await
    }

    /// Inverts every record's selected flag.
    pub async fn toggle_selection(&self) -> Result<(), DirectoryError> {
        self.acked(|ack| Msg::ToggleSelection { ack }).await
    }

    /// Toggles one record's selected flag.
    pub async fn toggle_record(&self, id: RecordId) -> Result<(), DirectoryError> {
        self.acked(|ack| Msg::ToggleRecord { id, ack }).await
    }

    pub async fn set_filter(&self, filter: impl Into<String>) -> Result<(), DirectoryError> {
        let filter = filter.into();
        self.acked(|ack| Msg::SetFilter { filter, ack }).await
    }

    pub async fn set_auto_convert(&self, enabled: bool) -> Result<(), DirectoryError> {
        self.acked(|ack| Msg::SetAutoConvert { enabled, ack }).await
    }

    pub async fn set_auto_validate_all(&self, enabled: bool) -> Result<(), DirectoryError> {
        self.acked(|ack| Msg::SetAutoValidateAll { enabled, ack })
            .await
    }

    pub async fn set_only_updated(&self, enabled: bool) -> Result<(), DirectoryError> {
        self.acked(|ack| Msg::SetOnlyUpdated { enabled, ack }).await
    }

    pub async fn set_only_failed(&self, enabled: bool) -> Result<(), DirectoryError> {
        self.acked(|ack| Msg::SetOnlyFailed { enabled, ack }).await
    }

    /// Converts the given files, regardless of selection or filter.
    pub async fn convert_paths(
        &self,
        paths: Vec<PathBuf>,
    ) -> Result<BatchHandle, DirectoryError> {
        self.convert(ConvertTarget::Paths(paths)).await
    }

    /// Converts the selected records matching the filter and toggles.
    pub async fn convert_selected(&self) -> Result<BatchHandle, DirectoryError> {
        self.convert(ConvertTarget::Selected).await
    }

    /// Like [`convert_selected`](Self::convert_selected), but only files
    /// modified since their last conversion.
    pub async fn convert_modified(&self) -> Result<BatchHandle, DirectoryError> {
        self.convert(ConvertTarget::Modified).await
    }

    async fn convert(&self, target: ConvertTarget) -> Result<BatchHandle, DirectoryError> {
        let (done, rx) = oneshot::channel();
        self.send(Msg::Convert { target, done })?;
        Ok(BatchHandle::new(rx))
    }

    /// Runs the directory validation script and returns its status string.
    pub async fn validate_all(&self) -> Result<String, DirectoryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::ValidateAll { reply })?;
        rx.await.map_err(|_| DirectoryError::Closed)
    }

    pub async fn snapshot(&self) -> Result<DirectorySnapshot, DirectoryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Snapshot { reply })?;
        rx.await.map_err(|_| DirectoryError::Closed)
    }

    /// Stops the watcher and the actor. In-flight jobs are left to drain
    /// with the runtime.
    pub async fn shutdown(&self) -> Result<(), DirectoryError> {
        self.acked(|ack| Msg::Shutdown { ack }).await
    }

    async fn acked(
        &self,
        make: impl FnOnce(oneshot::Sender<()>) -> Msg,
    ) -> Result<(), DirectoryError> {
        let (ack, rx) = oneshot::channel();
        self.send(make(ack))?;
        rx.await.map_err(|_| DirectoryError::Closed)
    }

    fn send(&self, msg: Msg) -> Result<(), DirectoryError> {
        self.tx.send(msg).map_err(|_| DirectoryError::Closed)
    }
}
