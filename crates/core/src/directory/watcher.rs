//! Filesystem watching for the open input directory.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::warn;

use crate::engine::is_convertible;

use super::actor::Msg;

/// A change to a convertible file in the watched directory.
#[derive(Debug, Clone)]
pub(super) enum FsChange {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl FsChange {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Removed(p) => p,
        }
    }
}

/// Keeps the watch registration alive; dropping it stops the watch.
pub(super) struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

/// Watches `dir` non-recursively and forwards changes to convertible
/// files into the actor channel.
pub(super) fn watch_directory(
    dir: &Path,
    tx: mpsc::UnboundedSender<Msg>,
) -> notify::Result<DirectoryWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "filesystem watcher error");
                    return;
                }
            };
            for change in changes_of(event) {
                if tx.send(Msg::FsEvent(change)).is_err() {
                    return;
                }
            }
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(DirectoryWatcher { _watcher: watcher })
}

fn changes_of(event: Event) -> Vec<FsChange> {
    let make: fn(PathBuf) -> FsChange = match event.kind {
        EventKind::Create(_) => FsChange::Created,
        EventKind::Modify(_) => FsChange::Modified,
        EventKind::Remove(_) => FsChange::Removed,
        _ => return Vec::new(),
    };
    event
        .paths
        .into_iter()
        .filter(|path| {
            path.file_name()
                .map(|n| is_convertible(&n.to_string_lossy()))
                .unwrap_or(false)
        })
        .map(make)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};

    #[test]
    fn test_non_convertible_paths_are_dropped() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/dir/notes.txt"))
            .add_path(PathBuf::from("/dir/items.xlsx"));
        let changes = changes_of(event);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path(), Path::new("/dir/items.xlsx"));
        assert!(matches!(changes[0], FsChange::Created(_)));
    }

    #[test]
    fn test_remove_maps_to_removed() {
        let event = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/dir/__enums.lua"));
        let changes = changes_of(event);
        assert!(matches!(changes[0], FsChange::Removed(_)));
    }

    #[test]
    fn test_other_kinds_ignored() {
        let event = Event::new(EventKind::Access(notify::event::AccessKind::Read))
            .add_path(PathBuf::from("/dir/items.xlsx"));
        assert!(changes_of(event).is_empty());
    }
}
