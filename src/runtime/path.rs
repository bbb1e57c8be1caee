//! Path utility functions for normalization and comparison.

use std::path::{Component, Path, PathBuf};

/// Suffix that marks a manifest entry as a whole directory tree.
pub const RECURSIVE_MARKER: &str = "**";

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {
                // Skip `.` components
            }
            Component::ParentDir => {
                // Pop the last component if possible
                if !result.pop() {
                    // If we can't pop (e.g., at root), keep the `..`
                    result.push(component);
                }
            }
            _ => {
                result.push(component);
            }
        }
    }
    result
}

/// Comparison key for a path: normalized, and case-folded on Windows.
///
/// Every "is this the same file" question in the crate goes through this
/// function, so manifests written with different spellings still match.
pub fn path_key(path: &Path) -> String {
    let normalized = normalize_path(path).to_string_lossy().into_owned();
    if cfg!(windows) {
        normalized.replace('/', "\\").to_lowercase()
    } else {
        normalized
    }
}

/// Split a `dir/**` entry into the directory it names.
pub fn split_recursive_marker(path: &Path) -> Option<&Path> {
    if path.file_name()? != RECURSIVE_MARKER {
        return None;
    }
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}
