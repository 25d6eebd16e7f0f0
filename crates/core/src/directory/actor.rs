//! The directory actor: sole owner and writer of all conversion state.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use crate::config::ConvertOptions;
use crate::engine::{is_convertible, ConversionEngine, ConversionJob, ENUM_SCRIPT_NAME};
use crate::error::ConvertError;
use crate::record::{FileRecord, RecordId};

use super::validate::{is_success, run_validate_all, VALIDATION_RUNNING};
use super::watcher::{watch_directory, DirectoryWatcher, FsChange};
use super::{BatchSummary, ChangeEvent, DirectoryError, DirectorySnapshot};

/// Which records a batch addresses.
pub(super) enum ConvertTarget {
    /// Exactly these files, regardless of selection and filter.
    Paths(Vec<PathBuf>),
    /// Selected records matching the filter and toggles.
    Selected,
    /// Like `Selected`, but only files modified since their last
    /// conversion.
    Modified,
}

/// One directory entry found while listing.
pub(super) struct ListedEntry {
    pub path: PathBuf,
    pub modified: i64,
}

#[derive(Clone, Copy)]
pub(super) enum ListMode {
    Open,
    Rescan,
}

/// How a job ended on the worker pool.
pub(super) enum JobOutcome {
    Success,
    Failed(ConvertError),
    Panicked(String),
    Cancelled,
}

pub(super) enum Msg {
    Open {
        input_dir: PathBuf,
        output_dir: PathBuf,
        ack: oneshot::Sender<Result<(), DirectoryError>>,
    },
    Rescan {
        ack: oneshot::Sender<Result<(), DirectoryError>>,
    },
    Listed {
        mode: ListMode,
        input_dir: PathBuf,
        output_dir: PathBuf,
        entries: Vec<ListedEntry>,
        ack: oneshot::Sender<Result<(), DirectoryError>>,
    },
    SelectAll {
        ack: oneshot::Sender<()>,
    },
    DeselectAll {
        ack: oneshot::Sender<()>,
    },
    ToggleSelection {
        ack: oneshot::Sender<()>,
    },
    ToggleRecord {
        id: RecordId,
        ack: oneshot::Sender<()>,
    },
    SetFilter {
        filter: String,
        ack: oneshot::Sender<()>,
    },
    SetAutoConvert {
        enabled: bool,
        ack: oneshot::Sender<()>,
    },
    SetAutoValidateAll {
        enabled: bool,
        ack: oneshot::Sender<()>,
    },
    SetOnlyUpdated {
        enabled: bool,
        ack: oneshot::Sender<()>,
    },
    SetOnlyFailed {
        enabled: bool,
        ack: oneshot::Sender<()>,
    },
    Convert {
        target: ConvertTarget,
        done: oneshot::Sender<BatchSummary>,
    },
    ValidateAll {
        reply: oneshot::Sender<String>,
    },
    JobProgress {
        id: RecordId,
        progress: f64,
    },
    JobFinished {
        id: RecordId,
        outcome: JobOutcome,
    },
    BatchSettled {
        summary: BatchSummary,
        /// The auto-validate toggle as it was when the batch started.
        auto_validate: bool,
        done: oneshot::Sender<BatchSummary>,
    },
    ValidationFinished {
        status: String,
        batch: Option<(oneshot::Sender<BatchSummary>, BatchSummary)>,
        reply: Option<oneshot::Sender<String>>,
    },
    FsEvent(FsChange),
    Snapshot {
        reply: oneshot::Sender<DirectorySnapshot>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

pub(super) struct Actor {
    rx: mpsc::UnboundedReceiver<Msg>,
    tx: mpsc::UnboundedSender<Msg>,
    events: broadcast::Sender<ChangeEvent>,
    options: ConvertOptions,
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    records: Vec<FileRecord>,
    filtered: Vec<RecordId>,
    validation_status: String,
    validation_pending: bool,
    watcher: Option<DirectoryWatcher>,
    next_id: RecordId,
}

impl Actor {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Msg>,
        tx: mpsc::UnboundedSender<Msg>,
        events: broadcast::Sender<ChangeEvent>,
        options: ConvertOptions,
    ) -> Self {
        Self {
            rx,
            tx,
            events,
            options,
            input_dir: None,
            output_dir: None,
            records: Vec::new(),
            filtered: Vec::new(),
            validation_status: String::new(),
            validation_pending: false,
            watcher: None,
            next_id: 0,
        }
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            if self.handle(msg) {
                break;
            }
        }
        info!("directory actor stopped");
    }

    /// Applies one message. Returns true to stop the actor.
    fn handle(&mut self, msg: Msg) -> bool {
        match msg {
            Msg::Open {
                input_dir,
                output_dir,
                ack,
            } => self.spawn_listing(ListMode::Open, input_dir, output_dir, ack),
            Msg::Rescan { ack } => match (self.input_dir.clone(), self.output_dir.clone()) {
                (Some(input_dir), Some(output_dir)) => {
                    self.spawn_listing(ListMode::Rescan, input_dir, output_dir, ack)
                }
                _ => {
                    let _ = ack.send(Err(DirectoryError::NotOpen));
                }
            },
            Msg::Listed {
                mode,
                input_dir,
                output_dir,
                entries,
                ack,
            } => {
                self.apply_listing(mode, input_dir, output_dir, entries);
                let _ = ack.send(Ok(()));
            }
            Msg::SelectAll { ack } => {
                self.set_selection_all(true);
                let _ = ack.send(());
            }
            Msg::DeselectAll { ack } => {
                self.set_selection_all(false);
                let _ = ack.send(());
            }
            Msg::ToggleSelection { ack } => {
                self.invert_selection();
                let _ = ack.send(());
            }
            Msg::ToggleRecord { id, ack } => {
                if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
                    record.selected = !record.selected;
                    let path = record.path.clone();
                    self.emit(ChangeEvent::RecordUpdated(path));
                }
                let _ = ack.send(());
            }
            Msg::SetFilter { filter, ack } => {
                if self.options.filter != filter {
                    self.options.filter = filter;
                    self.rebuild_filtered();
                    self.emit(ChangeEvent::FilterChanged);
                }
                let _ = ack.send(());
            }
            Msg::SetAutoConvert { enabled, ack } => {
                let was = self.options.auto_convert;
                self.options.auto_convert = enabled;
                self.emit(ChangeEvent::SettingsChanged);
                let _ = ack.send(());
                if !was && enabled {
                    self.start_batch(ConvertTarget::Modified, discard_summary());
                }
            }
            Msg::SetAutoValidateAll { enabled, ack } => {
                self.options.auto_validate_all = enabled;
                self.emit(ChangeEvent::SettingsChanged);
                let _ = ack.send(());
            }
            Msg::SetOnlyUpdated { enabled, ack } => {
                self.options.only_updated = enabled;
                self.emit(ChangeEvent::SettingsChanged);
                let _ = ack.send(());
            }
            Msg::SetOnlyFailed { enabled, ack } => {
                self.options.only_failed = enabled;
                self.emit(ChangeEvent::SettingsChanged);
                let _ = ack.send(());
            }
            Msg::Convert { target, done } => self.start_batch(target, done),
            Msg::ValidateAll { reply } => self.begin_validation(None, Some(reply)),
            Msg::JobProgress { id, progress } => {
                if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
                    record.set_progress(progress);
                    let path = record.path.clone();
                    self.emit(ChangeEvent::RecordUpdated(path));
                }
            }
            Msg::JobFinished { id, outcome } => self.finish_job(id, outcome),
            Msg::BatchSettled {
                summary,
                auto_validate,
                done,
            } => self.settle_batch(summary, auto_validate, done),
            Msg::ValidationFinished {
                status,
                batch,
                reply,
            } => {
                self.validation_status = status.clone();
                if is_success(&status) {
                    self.validation_pending = false;
                }
                self.emit(ChangeEvent::ValidationChanged);
                if let Some((done, summary)) = batch {
                    let _ = done.send(summary);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(status);
                }
            }
            Msg::FsEvent(change) => self.apply_fs_change(change),
            Msg::Snapshot { reply } => {
                let _ = reply.send(DirectorySnapshot {
                    input_dir: self.input_dir.clone(),
                    output_dir: self.output_dir.clone(),
                    options: self.options.clone(),
                    validation_status: self.validation_status.clone(),
                    validation_pending: self.validation_pending,
                    records: self.records.clone(),
                    filtered: self.filtered.clone(),
                });
            }
            Msg::Shutdown { ack } => {
                self.watcher = None;
                let _ = ack.send(());
                return true;
            }
        }
        false
    }

    fn spawn_listing(
        &self,
        mode: ListMode,
        input_dir: PathBuf,
        output_dir: PathBuf,
        ack: oneshot::Sender<Result<(), DirectoryError>>,
    ) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let listing = {
                let dir = input_dir.clone();
                tokio::task::spawn_blocking(move || list_convertible(&dir)).await
            };
            match listing {
                Ok(Ok(entries)) => {
                    let _ = tx.send(Msg::Listed {
                        mode,
                        input_dir,
                        output_dir,
                        entries,
                        ack,
                    });
                }
                Ok(Err(e)) => {
                    let _ = ack.send(Err(DirectoryError::List(e.to_string())));
                }
                Err(e) => {
                    let _ = ack.send(Err(DirectoryError::List(e.to_string())));
                }
            }
        });
    }

    fn apply_listing(
        &mut self,
        mode: ListMode,
        input_dir: PathBuf,
        output_dir: PathBuf,
        entries: Vec<ListedEntry>,
    ) {
        match mode {
            ListMode::Open => {
                self.watcher = None;
                self.records = entries
                    .into_iter()
                    .map(|e| FileRecord::new(self.take_id(), e.path, e.modified))
                    .collect();
                self.validation_status.clear();
                self.validation_pending = false;
                self.start_watcher(&input_dir);
                self.input_dir = Some(input_dir);
                self.output_dir = Some(output_dir);
                self.rebuild_filtered();
                self.emit(ChangeEvent::CollectionReplaced);
            }
            ListMode::Rescan => {
                // A listing raced with a newer open; drop it.
                if self.input_dir.as_ref() != Some(&input_dir) {
                    return;
                }
                let mut previous = std::mem::take(&mut self.records);
                self.records = entries
                    .into_iter()
                    .map(|entry| {
                        match previous.iter().position(|r| r.path == entry.path) {
                            // Reused records keep their observed state and
                            // timestamps; batches re-read mtimes anyway.
                            Some(pos) => previous.remove(pos),
                            None => FileRecord::new(self.take_id(), entry.path, entry.modified),
                        }
                    })
                    .collect();
                self.rebuild_filtered();
                self.emit(ChangeEvent::CollectionReplaced);
                if self.options.auto_convert {
                    self.start_batch(ConvertTarget::Modified, discard_summary());
                }
            }
        }
    }

    fn start_watcher(&mut self, input_dir: &Path) {
        match watch_directory(input_dir, self.tx.clone()) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => {
                warn!(dir = %input_dir.display(), error = %e, "could not watch directory");
                self.watcher = None;
            }
        }
    }

    fn invert_selection(&mut self) {
        let mut changed = Vec::with_capacity(self.records.len());
        for record in &mut self.records {
            record.selected = !record.selected;
            changed.push(record.path.clone());
        }
        for path in changed {
            self.emit(ChangeEvent::RecordUpdated(path));
        }
    }

    fn set_selection_all(&mut self, selected: bool) {
        let mut changed = Vec::new();
        for record in &mut self.records {
            if record.selected != selected {
                record.selected = selected;
                changed.push(record.path.clone());
            }
        }
        for path in changed {
            self.emit(ChangeEvent::RecordUpdated(path));
        }
    }

    fn start_batch(&mut self, target: ConvertTarget, done: oneshot::Sender<BatchSummary>) {
        let (Some(input_dir), Some(output_dir)) =
            (self.input_dir.clone(), self.output_dir.clone())
        else {
            let _ = done.send(BatchSummary {
                submitted: 0,
                succeeded: 0,
            });
            return;
        };

        // Batch eligibility works on current disk state, not on what the
        // watcher happened to deliver so far.
        if !matches!(target, ConvertTarget::Paths(_)) {
            for record in &mut self.records {
                if let Some(ts) = mtime_ms(&record.path) {
                    record.last_modified = ts;
                }
            }
        }

        let eligible: Vec<(RecordId, PathBuf)> = self
            .records
            .iter()
            .filter(|r| self.is_eligible(r, &target))
            .map(|r| (r.id, r.path.clone()))
            .collect();

        let mut jobs = Vec::with_capacity(eligible.len());
        for (id, path) in eligible {
            let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
                continue;
            };
            if record.begin_run() {
                jobs.push((id, path.clone()));
                self.emit(ChangeEvent::RecordUpdated(path));
            }
        }

        let submitted = jobs.len();

        // The toggle is latched at submission; flipping it mid-batch does
        // not change whether this batch validates.
        let auto_validate = self.options.auto_validate_all;
        if auto_validate && (submitted > 0 || self.validation_pending) {
            self.validation_status = VALIDATION_RUNNING.to_string();
            self.emit(ChangeEvent::ValidationChanged);
        }

        let (enum_jobs, rest): (Vec<_>, Vec<_>) = jobs.into_iter().partition(|(_, path)| {
            path.file_name().map(|n| n == ENUM_SCRIPT_NAME).unwrap_or(false)
        });

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut succeeded = 0usize;

            // The enum job settles first so sibling jobs see fresh
            // definitions; its failure does not stop them.
            for (id, path) in enum_jobs {
                if run_one(id, path, input_dir.clone(), output_dir.clone(), tx.clone()).await {
                    succeeded += 1;
                }
            }

            let handles: Vec<_> = rest
                .into_iter()
                .map(|(id, path)| {
                    tokio::spawn(run_one(
                        id,
                        path,
                        input_dir.clone(),
                        output_dir.clone(),
                        tx.clone(),
                    ))
                })
                .collect();
            let results = futures::future::join_all(handles).await;
            succeeded += results
                .into_iter()
                .filter(|r| matches!(r, Ok(true)))
                .count();

            let _ = tx.send(Msg::BatchSettled {
                summary: BatchSummary {
                    submitted,
                    succeeded,
                },
                auto_validate,
                done,
            });
        });
    }

    fn is_eligible(&self, record: &FileRecord, target: &ConvertTarget) -> bool {
        match target {
            ConvertTarget::Paths(paths) => paths.iter().any(|p| p == &record.path),
            ConvertTarget::Selected => self.passes_toggles(record),
            ConvertTarget::Modified => self.passes_toggles(record) && record.needs_convert(),
        }
    }

    fn passes_toggles(&self, record: &FileRecord) -> bool {
        record.selected
            && self.matches_filter(record)
            && (!self.options.only_updated || record.needs_convert())
            && (!self.options.only_failed || !record.error_text.is_empty())
    }

    fn matches_filter(&self, record: &FileRecord) -> bool {
        record.file_name().contains(&self.options.filter)
    }

    fn finish_job(&mut self, id: RecordId, outcome: JobOutcome) {
        let now = now_ms();
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            return;
        };
        let name = record.file_name();
        match outcome {
            JobOutcome::Success => {
                record.finish_success(now);
                info!(file = %name, "conversion succeeded");
            }
            JobOutcome::Failed(error) => {
                record.finish_failure(&error);
                warn!(file = %name, error = %error, "conversion failed");
            }
            JobOutcome::Panicked(message) => {
                record.finish_unexpected(&message);
                warn!(file = %name, message = %message, "conversion worker failed");
            }
            JobOutcome::Cancelled => {
                record.finish_cancelled();
                warn!(file = %name, "conversion cancelled");
            }
        }
        let path = record.path.clone();
        self.emit(ChangeEvent::RecordUpdated(path));
    }

    fn settle_batch(
        &mut self,
        summary: BatchSummary,
        auto_validate: bool,
        done: oneshot::Sender<BatchSummary>,
    ) {
        let owed = summary.succeeded > 0 || self.validation_pending;
        if !owed {
            // Nothing succeeded; retract the provisional running marker.
            if self.validation_status == VALIDATION_RUNNING {
                self.validation_status.clear();
                self.emit(ChangeEvent::ValidationChanged);
            }
            let _ = done.send(summary);
            return;
        }
        if auto_validate {
            self.begin_validation(Some((done, summary)), None);
        } else {
            self.validation_pending = true;
            self.emit(ChangeEvent::ValidationChanged);
            let _ = done.send(summary);
        }
    }

    fn begin_validation(
        &mut self,
        batch: Option<(oneshot::Sender<BatchSummary>, BatchSummary)>,
        reply: Option<oneshot::Sender<String>>,
    ) {
        let (Some(input_dir), Some(output_dir)) =
            (self.input_dir.clone(), self.output_dir.clone())
        else {
            let status = "E no directory open".to_string();
            if let Some((done, summary)) = batch {
                let _ = done.send(summary);
            }
            if let Some(reply) = reply {
                let _ = reply.send(status);
            }
            return;
        };

        self.validation_status = VALIDATION_RUNNING.to_string();
        self.emit(ChangeEvent::ValidationChanged);

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let status =
                tokio::task::spawn_blocking(move || run_validate_all(&input_dir, &output_dir))
                    .await
                    .unwrap_or_else(|e| format!("E validation worker failed: {e}"));
            let _ = tx.send(Msg::ValidationFinished {
                status,
                batch,
                reply,
            });
        });
    }

    fn apply_fs_change(&mut self, change: FsChange) {
        let Some(input_dir) = self.input_dir.clone() else {
            return;
        };
        // Events queued before a reopen may belong to the old directory.
        if change.path().parent() != Some(input_dir.as_path()) {
            return;
        }
        match change {
            FsChange::Created(path) => {
                if self.records.iter().any(|r| r.path == path) {
                    self.record_modified(path);
                } else {
                    let ts = mtime_ms(&path).unwrap_or_else(now_ms);
                    let record = FileRecord::new(self.take_id(), path.clone(), ts);
                    let matches = self.matches_filter(&record);
                    let id = record.id;
                    self.records.push(record);
                    if matches {
                        self.filtered.push(id);
                    }
                    self.emit(ChangeEvent::RecordAdded(path.clone()));
                    if self.options.auto_convert {
                        self.start_batch(ConvertTarget::Paths(vec![path]), discard_summary());
                    }
                }
            }
            FsChange::Modified(path) => self.record_modified(path),
            FsChange::Removed(path) => {
                let Some(pos) = self.records.iter().position(|r| r.path == path) else {
                    return;
                };
                let record = self.records.remove(pos);
                self.filtered.retain(|&id| id != record.id);
                self.emit(ChangeEvent::RecordRemoved(path));
            }
        }
    }

    fn record_modified(&mut self, path: PathBuf) {
        let Some(record) = self.records.iter_mut().find(|r| r.path == path) else {
            return;
        };
        let ts = mtime_ms(&path).unwrap_or_else(now_ms);
        record.on_modified(ts);
        let selected = record.selected;
        self.emit(ChangeEvent::RecordUpdated(path.clone()));
        if self.options.auto_convert && selected {
            self.start_batch(ConvertTarget::Paths(vec![path]), discard_summary());
        }
    }

    fn rebuild_filtered(&mut self) {
        self.filtered = self
            .records
            .iter()
            .filter(|r| self.matches_filter(r))
            .map(|r| r.id)
            .collect();
    }

    fn take_id(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }

    fn emit(&self, event: ChangeEvent) {
        let _ = self.events.send(event);
    }
}

/// Runs one job on the blocking pool and reports the outcome into the
/// actor channel. Returns whether the job succeeded.
async fn run_one(
    id: RecordId,
    path: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
    tx: mpsc::UnboundedSender<Msg>,
) -> bool {
    let job = ConversionJob {
        path,
        input_dir,
        output_dir,
    };
    let progress_tx = tx.clone();
    let result = tokio::task::spawn_blocking(move || {
        let engine = ConversionEngine::new(job)?;
        let mut progress = |p: f64| {
            let _ = progress_tx.send(Msg::JobProgress { id, progress: p });
        };
        engine.run(&mut progress)
    })
    .await;

    let (outcome, succeeded) = match result {
        Ok(Ok(())) => (JobOutcome::Success, true),
        Ok(Err(error)) => (JobOutcome::Failed(error), false),
        Err(join) if join.is_panic() => {
            let payload = join.into_panic();
            let message = payload
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "conversion worker panicked".to_string());
            (JobOutcome::Panicked(message), false)
        }
        Err(_) => (JobOutcome::Cancelled, false),
    };
    let _ = tx.send(Msg::JobFinished { id, outcome });
    succeeded
}

fn discard_summary() -> oneshot::Sender<BatchSummary> {
    let (tx, _rx) = oneshot::channel();
    tx
}

/// Lists the convertible entries of a directory, sorted by file name.
fn list_convertible(dir: &Path) -> std::io::Result<Vec<ListedEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if !is_convertible(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let modified = mtime_ms(&path).unwrap_or_else(now_ms);
        entries.push(ListedEntry { path, modified });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn mtime_ms(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since_epoch.as_millis()).ok()
}
