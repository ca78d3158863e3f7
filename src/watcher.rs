//! Filesystem event source for the watched inbox.
//!
//! This module is a thin adaptation of native filesystem notifications
//! (via the `notify` crate) for a single, non-recursive directory. Raw OS
//! events are normalized into [`WatchEvent`]s: partial renames degrade to
//! plain create/delete events, directory events are dropped, and rescan
//! notices (emitted by the OS when its event queue overflows) surface as a
//! synthetic [`WatchMessage::Resynchronize`] that tells the engine to
//! re-list the directory and reconcile its tracked state against reality.
//!
//! Delivery is push-based through an mpsc channel; the consuming engine
//! blocks on the receiving end between events and never polls.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

/// The kind of a normalized filesystem notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A file appeared in the inbox.
    Created,
    /// A file's contents or metadata changed.
    Modified,
    /// A file was renamed or moved; `previous_path` carries the old name.
    RenamedOrMoved,
    /// A file disappeared from the inbox.
    Deleted,
}

/// A single normalized filesystem notification for the watched inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// The path the event refers to (the destination path, for renames).
    pub path: PathBuf,
    /// The path before the rename; present only for `RenamedOrMoved`.
    pub previous_path: Option<PathBuf>,
}

impl WatchEvent {
    pub fn created(path: PathBuf) -> Self {
        Self {
            kind: WatchEventKind::Created,
            path,
            previous_path: None,
        }
    }

    pub fn modified(path: PathBuf) -> Self {
        Self {
            kind: WatchEventKind::Modified,
            path,
            previous_path: None,
        }
    }

    pub fn renamed(previous: PathBuf, path: PathBuf) -> Self {
        Self {
            kind: WatchEventKind::RenamedOrMoved,
            path,
            previous_path: Some(previous),
        }
    }

    pub fn deleted(path: PathBuf) -> Self {
        Self {
            kind: WatchEventKind::Deleted,
            path,
            previous_path: None,
        }
    }
}

/// Messages delivered to the engine's processing loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    /// A normalized filesystem notification.
    Event(WatchEvent),
    /// The OS event queue overflowed or the watcher hiccuped; the engine
    /// must re-scan the directory listing instead of trusting the stream.
    Resynchronize,
    /// External stop request; the engine winds down cleanly.
    Shutdown,
}

/// Errors that can occur while opening the directory watch.
#[derive(Debug)]
pub enum WatchError {
    /// The watch target does not exist or is not a directory.
    NotADirectory(PathBuf),
    /// The underlying notification backend refused the watch.
    OpenFailed {
        path: PathBuf,
        source: notify::Error,
    },
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::NotADirectory(path) => {
                write!(f, "Watch target is not a directory: {}", path.display())
            }
            WatchError::OpenFailed { path, source } => {
                write!(f, "Failed to watch {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for WatchError {}

/// A live, non-recursive watch over one directory.
///
/// Dropping the watcher stops event delivery and closes the channel from
/// the producing side.
pub struct DirectoryWatcher {
    // Held only to keep the native watch registration alive.
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Opens a watch on `dir`, delivering messages through `sender`.
    ///
    /// Events are forwarded in the order the OS reports them. Watcher-level
    /// errors and rescan notices are mapped to
    /// [`WatchMessage::Resynchronize`] rather than surfaced as failures,
    /// since the engine can always recover by re-listing the directory.
    pub fn open(dir: &Path, sender: Sender<WatchMessage>) -> Result<Self, WatchError> {
        if !dir.is_dir() {
            return Err(WatchError::NotADirectory(dir.to_path_buf()));
        }

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if event.need_rescan() {
                        let _ = sender.send(WatchMessage::Resynchronize);
                        return;
                    }
                    for normalized in normalize(event) {
                        let _ = sender.send(WatchMessage::Event(normalized));
                    }
                }
                Err(_) => {
                    let _ = sender.send(WatchMessage::Resynchronize);
                }
            },
            Config::default(),
        )
        .map_err(|e| WatchError::OpenFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::OpenFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;

        Ok(Self { _watcher: watcher })
    }
}

/// Normalizes one raw `notify` event into zero or more [`WatchEvent`]s.
///
/// Platform backends disagree on how renames are reported: inotify pairs
/// them into a single two-path event, while others emit separate from/to
/// halves. A lone "from" half is indistinguishable from a deletion and a
/// lone "to" half from a creation, so they are degraded accordingly; the
/// tracker's delete-then-create completion path covers the rest.
fn normalize(event: Event) -> Vec<WatchEvent> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event.paths.into_iter().map(WatchEvent::created).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if event.paths.len() >= 2 {
                let mut paths = event.paths;
                let to = paths.swap_remove(1);
                let from = paths.swap_remove(0);
                vec![WatchEvent::renamed(from, to)]
            } else {
                event.paths.into_iter().map(WatchEvent::modified).collect()
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .into_iter()
            .map(WatchEvent::deleted)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .into_iter()
            .map(WatchEvent::created)
            .collect(),
        EventKind::Modify(_) => event.paths.into_iter().map(WatchEvent::modified).collect(),
        EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Remove(_) => event.paths.into_iter().map(WatchEvent::deleted).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}
