//! Runtime abstraction for system operations.
//!
//! This module provides a trait-based abstraction over the filesystem
//! primitives the lifecycle needs, so removal and manifest handling can be
//! exercised against mocks.
//!
//! # Structure
//!
//! - `path` - Lexical normalization and comparison keys
//! - `env` - Well-known directories
//! - `fs` - File system operations (read, write, delete, directory)
//! - `reboot` - Deferred deletion at next reboot
//!
//! Every primitive returns `std::io::Result` so callers can tell "not found"
//! and "access denied" apart.

mod env;
mod fs;
pub mod path;
mod reboot;

use std::io;
use std::path::{Path, PathBuf};

pub use path::{normalize_path, path_key};

/// What a path refers to, without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File { read_only: bool },
    Directory,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // File System
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn create_file(&self, path: &Path) -> io::Result<Box<dyn io::Write + Send>>;
    fn open(&self, path: &Path) -> io::Result<Box<dyn io::Read + Send>>;
    fn exists(&self, path: &Path) -> bool;
    fn file_size(&self, path: &Path) -> io::Result<u64>;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Classify a path without following symlinks.
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    fn set_read_only(&self, path: &Path, read_only: bool) -> io::Result<()>;

    /// Set file permissions (mode) on Unix systems. No-op on Windows.
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Ask the operating system to delete `path` during the next reboot.
    fn delete_on_reboot(&self, path: &Path) -> io::Result<()>;

    // Directories
    fn current_dir(&self) -> io::Result<PathBuf>;
    fn data_local_dir(&self) -> Option<PathBuf>;
}

pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.write_impl(path, contents)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.read_to_string_impl(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.rename_impl(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.create_dir_all_impl(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<Box<dyn io::Write + Send>> {
        self.create_file_impl(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn io::Read + Send>> {
        self.open_impl(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.exists_impl(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.file_size_impl(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.read_dir_impl(path)
    }

    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind> {
        self.entry_kind_impl(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.remove_file_impl(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.remove_dir_impl(path)
    }

    fn set_read_only(&self, path: &Path, read_only: bool) -> io::Result<()> {
        self.set_read_only_impl(path, read_only)
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.set_permissions_impl(path, mode)
    }

    fn delete_on_reboot(&self, path: &Path) -> io::Result<()> {
        self.delete_on_reboot_impl(path)
    }

    fn current_dir(&self) -> io::Result<PathBuf> {
        self.current_dir_impl()
    }

    fn data_local_dir(&self) -> Option<PathBuf> {
        self.data_local_dir_impl()
    }
}
