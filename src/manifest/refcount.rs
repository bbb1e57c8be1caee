//! Reference counts of files across all installed products.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;

use log::{debug, warn};

use super::{MANIFEST_EXTENSION, ManifestReader};
use crate::runtime::{Runtime, path_key};

/// Number of manifests that list each file.
///
/// Built from a snapshot of the manifest directory before anything is
/// removed; a path counts once per manifest however often it is listed.
#[derive(Debug, Default)]
pub struct GlobalRefCounter {
    refs: HashMap<String, u32>,
}

impl GlobalRefCounter {
    #[tracing::instrument(skip(runtime))]
    pub fn build<R: Runtime>(runtime: &R, manifest_dir: &Path) -> Self {
        let mut counter = Self::default();

        let entries = match runtime.read_dir(manifest_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Manifest directory {} does not exist", manifest_dir.display());
                return counter;
            }
            Err(e) => {
                warn!(
                    "Failed to list manifests in {}: {}",
                    manifest_dir.display(),
                    e
                );
                return counter;
            }
        };

        for entry in entries {
            let is_manifest = entry
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION));
            if !is_manifest || runtime.entry_kind(&entry).is_ok_and(|kind| kind.is_dir()) {
                continue;
            }
            if let Err(e) = counter.add_manifest(runtime, &entry) {
                warn!("Skipping unreadable manifest {}: {}", entry.display(), e);
            }
        }

        debug!(
            "Counted {} distinct files across manifests in {}",
            counter.refs.len(),
            manifest_dir.display()
        );
        counter
    }

    /// Count every path listed in one manifest.
    ///
    /// On a read error the entries read so far stay counted.
    pub fn add_manifest<R: Runtime>(&mut self, runtime: &R, manifest: &Path) -> io::Result<()> {
        let mut seen = HashSet::new();
        for path in ManifestReader::open(runtime, manifest)? {
            let key = path_key(&path?);
            if seen.insert(key.clone()) {
                *self.refs.entry(key).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    pub fn inc_file_ref(&mut self, path: &Path) -> u32 {
        let count = self.refs.entry(path_key(path)).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Drop one reference; unknown paths stay unknown and return 0.
    pub fn dec_file_ref(&mut self, path: &Path) -> u32 {
        match self.refs.get_mut(&path_key(path)) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        }
    }

    pub fn ref_count(&self, path: &Path) -> u32 {
        self.refs.get(&path_key(path)).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write_manifest(dir: &Path, name: &str, paths: &[&str]) {
        let mut content = String::from("; setupkeep\n");
        for path in paths {
            content.push_str(path);
            content.push('\n');
        }
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_counts_each_manifest_once_per_path() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        write_manifest(dir.path(), "A.txt", &["/shared/lib.so", "/a/only", "/shared/lib.so"]);
        write_manifest(dir.path(), "B.txt", &["/shared/./lib.so", "/b/only"]);
        write_manifest(dir.path(), "notes.log", &["/a/only"]);
        fs::create_dir(dir.path().join("nested.txt")).unwrap();

        let counter = GlobalRefCounter::build(&runtime, dir.path());
        assert_eq!(counter.ref_count(Path::new("/shared/lib.so")), 2);
        assert_eq!(counter.ref_count(Path::new("/a/only")), 1);
        assert_eq!(counter.ref_count(Path::new("/b/only")), 1);
    }

    #[test]
    fn test_unreadable_manifest_is_skipped() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        write_manifest(dir.path(), "A.txt", &["/shared/lib.so", "/a/only"]);
        fs::write(
            dir.path().join("B.txt"),
            b"/b/before\n/b/\xff\xfe\n/shared/lib.so\n".as_slice(),
        )
        .unwrap();
        write_manifest(dir.path(), "C.txt", &["/c/only"]);

        let counter = GlobalRefCounter::build(&runtime, dir.path());
        // B stops at the invalid line; what it listed before stays counted
        assert_eq!(counter.ref_count(Path::new("/b/before")), 1);
        assert_eq!(counter.ref_count(Path::new("/shared/lib.so")), 1);
        assert_eq!(counter.ref_count(Path::new("/a/only")), 1);
        assert_eq!(counter.ref_count(Path::new("/c/only")), 1);
    }

    #[test]
    fn test_missing_directory_gives_empty_counter() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let counter = GlobalRefCounter::build(&runtime, &dir.path().join("nope"));
        assert_eq!(counter.ref_count(Path::new("/anything")), 0);
    }

    #[test]
    fn test_dec_file_ref_floors_at_zero() {
        let mut counter = GlobalRefCounter::default();
        let path = PathBuf::from("/opt/app/a.dll");

        assert_eq!(counter.inc_file_ref(&path), 1);
        assert_eq!(counter.inc_file_ref(&path), 2);
        assert_eq!(counter.dec_file_ref(&path), 1);
        assert_eq!(counter.dec_file_ref(&path), 0);
        assert_eq!(counter.dec_file_ref(&path), 0);
    }

    #[test]
    fn test_dec_unknown_path_returns_zero_without_entry() {
        let mut counter = GlobalRefCounter::default();
        assert_eq!(counter.dec_file_ref(Path::new("/unknown")), 0);
        assert!(counter.refs.is_empty());
    }

    #[test]
    fn test_shared_file_survives_one_owner() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        write_manifest(dir.path(), "A.txt", &["/shared/lib.so", "/a/only"]);
        write_manifest(dir.path(), "B.txt", &["/shared/lib.so"]);

        let mut counter = GlobalRefCounter::build(&runtime, dir.path());
        // Removing A: its own reference goes away first
        assert_eq!(counter.dec_file_ref(Path::new("/shared/lib.so")), 1);
        assert_eq!(counter.dec_file_ref(Path::new("/a/only")), 0);
    }
}
