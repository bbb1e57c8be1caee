//! Ordered removal of files and directories.
//!
//! Files are deleted as soon as they are scheduled. Directories are deferred
//! until [`RemovalScheduler::flush_delayed`], which removes them deepest first
//! so a parent is only attempted after everything under it.

use std::collections::{HashSet, VecDeque};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::progress::{Processing, ProgressSink};
use crate::runtime::{EntryKind, Runtime, normalize_path, path::split_recursive_marker, path_key};

/// What happened to a scheduled path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed,
    /// Already gone; counts as removed
    NotFound,
    /// Directory queued for [`RemovalScheduler::flush_delayed`]
    Deferred,
    /// Locked file handed to the operating system for deletion at reboot
    PendingReboot,
    Failed,
}

/// A unit of removal work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalItem {
    File { read_only: bool },
    Directory { recursive: bool },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemovalOptions {
    /// Fall back to deletion at next reboot for files that are in use
    pub mark_for_reboot: bool,
}

/// First removal error that made the batch unsuccessful.
#[derive(Debug)]
pub struct RemovalFailure {
    pub path: PathBuf,
    pub source: io::Error,
}

#[derive(Debug)]
struct DeferredDirectory {
    path: PathBuf,
    /// Path as scheduled, `dir/**` for recursive jobs
    entry: PathBuf,
    recursive: bool,
}

pub struct RemovalScheduler<'a, R: Runtime> {
    runtime: &'a R,
    options: RemovalOptions,
    directories: Vec<DeferredDirectory>,
    first_failure: Option<RemovalFailure>,
    not_found: usize,
    really_deleted: HashSet<String>,
    pending_reboot: Vec<PathBuf>,
}

impl<'a, R: Runtime> RemovalScheduler<'a, R> {
    pub fn new(runtime: &'a R, options: RemovalOptions) -> Self {
        Self {
            runtime,
            options,
            directories: Vec::new(),
            first_failure: None,
            not_found: 0,
            really_deleted: HashSet::new(),
            pending_reboot: Vec::new(),
        }
    }

    /// Delete a file now or queue a directory for later.
    ///
    /// `dir/**` queues the whole tree under `dir`.
    #[tracing::instrument(skip(self))]
    pub fn schedule_remove(&mut self, path: &Path) -> RemovalOutcome {
        if let Some(dir) = split_recursive_marker(path) {
            return self.defer(dir, path, true);
        }

        let item = match self.runtime.entry_kind(path) {
            Ok(EntryKind::Directory) => RemovalItem::Directory { recursive: false },
            Ok(EntryKind::File { read_only }) => RemovalItem::File { read_only },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} is already gone", path.display());
                return self.record(path, RemovalOutcome::NotFound);
            }
            Err(e) => {
                warn!("Failed to inspect {}: {}", path.display(), e);
                self.note_failure(path, e);
                return RemovalOutcome::Failed;
            }
        };

        match item {
            RemovalItem::Directory { recursive } => self.defer(path, path, recursive),
            RemovalItem::File { read_only } => {
                let outcome = self.delete_file(path, read_only);
                self.record(path, outcome)
            }
        }
    }

    /// Remove every queued directory, deepest path first.
    ///
    /// One progress unit per directory job. Returns `Cancel` as soon as the
    /// sink asks for it; the remaining jobs stay queued.
    #[tracing::instrument(skip(self, progress))]
    pub fn flush_delayed(&mut self, progress: &mut dyn ProgressSink) -> Processing {
        // Stable sort keeps schedule order among equally long paths
        self.directories
            .sort_by(|a, b| b.path.as_os_str().len().cmp(&a.path.as_os_str().len()));
        progress.set_total(self.directories.len() as u64);

        let mut done = 0u64;
        while !self.directories.is_empty() {
            let job = self.directories.remove(0);
            let outcome = if job.recursive {
                self.remove_tree(&job.path)
            } else {
                self.remove_empty_dir(&job.path)
            };
            self.record(&job.entry, outcome);

            done += 1;
            if progress.set_completed(done) == Processing::Cancel {
                return Processing::Cancel;
            }
        }
        Processing::Continue
    }

    /// Directories still waiting for [`flush_delayed`](Self::flush_delayed).
    pub fn pending_directories(&self) -> usize {
        self.directories.len()
    }

    /// Overall result: the first failure, if any.
    pub fn result(&self) -> Result<(), &RemovalFailure> {
        match &self.first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    pub fn take_failure(&mut self) -> Option<RemovalFailure> {
        self.first_failure.take()
    }

    /// Keys of everything removed, found absent or left for reboot.
    pub fn really_deleted(&self) -> &HashSet<String> {
        &self.really_deleted
    }

    pub fn pending_reboot(&self) -> &[PathBuf] {
        &self.pending_reboot
    }

    pub fn not_found(&self) -> usize {
        self.not_found
    }

    fn defer(&mut self, path: &Path, entry: &Path, recursive: bool) -> RemovalOutcome {
        debug!(
            "Deferring removal of directory {}{}",
            path.display(),
            if recursive { " (recursive)" } else { "" }
        );
        self.directories.push(DeferredDirectory {
            path: normalize_path(path),
            entry: entry.to_path_buf(),
            recursive,
        });
        RemovalOutcome::Deferred
    }

    fn record(&mut self, path: &Path, outcome: RemovalOutcome) -> RemovalOutcome {
        match outcome {
            RemovalOutcome::NotFound => {
                self.not_found += 1;
                self.really_deleted.insert(path_key(path));
            }
            RemovalOutcome::Removed | RemovalOutcome::PendingReboot => {
                self.really_deleted.insert(path_key(path));
            }
            RemovalOutcome::Deferred | RemovalOutcome::Failed => {}
        }
        outcome
    }

    fn note_failure(&mut self, path: &Path, source: io::Error) {
        if self.first_failure.is_none() {
            self.first_failure = Some(RemovalFailure {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    fn delete_file(&mut self, path: &Path, read_only: bool) -> RemovalOutcome {
        if read_only {
            if let Err(e) = self.runtime.set_read_only(path, false) {
                debug!("Failed to clear read-only flag on {}: {}", path.display(), e);
            }
        }

        match self.runtime.remove_file(path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                RemovalOutcome::Removed
            }
            Err(e) if e.kind() == ErrorKind::NotFound => RemovalOutcome::NotFound,
            Err(e) if e.kind() == ErrorKind::PermissionDenied && self.options.mark_for_reboot => {
                match self.runtime.delete_on_reboot(path) {
                    Ok(()) => {
                        info!("{} is in use, it will be removed at next reboot", path.display());
                        self.pending_reboot.push(path.to_path_buf());
                        RemovalOutcome::PendingReboot
                    }
                    Err(reboot_err) => {
                        warn!(
                            "Failed to delete {}: {} (scheduling for reboot failed: {})",
                            path.display(),
                            e,
                            reboot_err
                        );
                        self.note_failure(path, e);
                        RemovalOutcome::Failed
                    }
                }
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                self.note_failure(path, e);
                RemovalOutcome::Failed
            }
        }
    }

    fn remove_empty_dir(&mut self, path: &Path) -> RemovalOutcome {
        match self.runtime.remove_dir(path) {
            Ok(()) => {
                debug!("Removed directory {}", path.display());
                RemovalOutcome::Removed
            }
            Err(e) if e.kind() == ErrorKind::NotFound => RemovalOutcome::NotFound,
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
                // Someone else still keeps files here; not an error
                info!("Leaving non-empty directory {}", path.display());
                RemovalOutcome::Failed
            }
            Err(e) => {
                warn!("Failed to remove directory {}: {}", path.display(), e);
                self.note_failure(path, e);
                RemovalOutcome::Failed
            }
        }
    }

    /// Breadth-first removal of a whole tree.
    ///
    /// Children are queued ahead of their parent and the parent is re-queued
    /// behind them; it is removed once it has no unattempted children left.
    /// Every entry is attempted at most once.
    fn remove_tree(&mut self, root: &Path) -> RemovalOutcome {
        let root_kind = match self.runtime.entry_kind(root) {
            Ok(kind) => kind,
            Err(e) if e.kind() == ErrorKind::NotFound => return RemovalOutcome::NotFound,
            Err(e) => {
                warn!("Failed to inspect {}: {}", root.display(), e);
                self.note_failure(root, e);
                return RemovalOutcome::Failed;
            }
        };

        let mut queue = VecDeque::from([(root.to_path_buf(), root_kind)]);
        let mut attempted: HashSet<PathBuf> = HashSet::new();

        while let Some((path, kind)) = queue.pop_front() {
            if attempted.contains(&path) {
                continue;
            }

            let read_only = match kind {
                EntryKind::File { read_only } => read_only,
                EntryKind::Directory => {
                    let children = match self.runtime.read_dir(&path) {
                        Ok(children) => children,
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => {
                            warn!("Failed to list {}: {}", path.display(), e);
                            self.note_failure(&path, e);
                            attempted.insert(path);
                            continue;
                        }
                    };

                    let fresh: Vec<PathBuf> = children
                        .into_iter()
                        .filter(|child| !attempted.contains(child))
                        .collect();
                    if fresh.is_empty() {
                        self.remove_empty_dir(&path);
                        attempted.insert(path);
                    } else {
                        for child in fresh {
                            match self.runtime.entry_kind(&child) {
                                Ok(child_kind) => queue.push_front((child, child_kind)),
                                Err(e) if e.kind() == ErrorKind::NotFound => {}
                                Err(e) => {
                                    warn!("Failed to inspect {}: {}", child.display(), e);
                                    self.note_failure(&child, e);
                                    attempted.insert(child);
                                }
                            }
                        }
                        queue.push_back((path, kind));
                    }
                    continue;
                }
            };

            self.delete_file(&path, read_only);
            attempted.insert(path);
        }

        if self.runtime.exists(root) {
            RemovalOutcome::Failed
        } else {
            RemovalOutcome::Removed
        }
    }
}
