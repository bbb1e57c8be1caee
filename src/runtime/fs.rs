//! File system operations (read, write, delete, directory, permissions).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{EntryKind, RealRuntime};

impl RealRuntime {
    #[tracing::instrument(skip(self, contents))]
    pub(crate) fn write_impl(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn read_to_string_impl(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn rename_impl(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn create_dir_all_impl(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn create_file_impl(&self, path: &Path) -> io::Result<Box<dyn io::Write + Send>> {
        let file = fs::File::create(path)?;
        Ok(Box::new(file))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn open_impl(&self, path: &Path) -> io::Result<Box<dyn io::Read + Send>> {
        let file = fs::File::open(path)?;
        Ok(Box::new(file))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn exists_impl(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn file_size_impl(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn read_dir_impl(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(path)?.map(|entry| Ok(entry?.path())).collect()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn entry_kind_impl(&self, path: &Path) -> io::Result<EntryKind> {
        let metadata = fs::symlink_metadata(path)?;
        if metadata.is_dir() {
            Ok(EntryKind::Directory)
        } else {
            Ok(EntryKind::File {
                read_only: metadata.permissions().readonly(),
            })
        }
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_file_impl(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_dir_impl(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn set_read_only_impl(&self, path: &Path, read_only: bool) -> io::Result<()> {
        let mut permissions = fs::symlink_metadata(path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(read_only);
        fs::set_permissions(path, permissions)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn set_permissions_impl(&self, path: &Path, mode: u32) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        {
            let _ = (path, mode); // Suppress unused warnings on non-Unix
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{EntryKind, RealRuntime, Runtime};
    use std::io::{ErrorKind, Read, Write};
    use tempfile::tempdir;

    #[test]
    fn test_real_runtime_file_ops() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");

        runtime.write(&file_path, b"hello").unwrap();
        assert!(runtime.exists(&file_path));
        assert_eq!(runtime.read_to_string(&file_path).unwrap(), "hello");
        assert_eq!(runtime.file_size(&file_path).unwrap(), 5);

        let new_path = dir.path().join("renamed.txt");
        runtime.rename(&file_path, &new_path).unwrap();
        assert!(!runtime.exists(&file_path));
        assert!(runtime.exists(&new_path));

        runtime.remove_file(&new_path).unwrap();
        assert!(!runtime.exists(&new_path));
    }

    #[test]
    fn test_real_runtime_dir_ops() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let sub_dir = dir.path().join("sub/nested");

        runtime.create_dir_all(&sub_dir).unwrap();
        assert_eq!(runtime.entry_kind(&sub_dir).unwrap(), EntryKind::Directory);

        let entries = runtime.read_dir(&dir.path().join("sub")).unwrap();
        assert_eq!(entries, vec![sub_dir.clone()]);

        runtime.remove_dir(&sub_dir).unwrap();
        assert!(!runtime.exists(&sub_dir));
    }

    #[test]
    fn test_remove_dir_refuses_non_empty_directory() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let sub_dir = dir.path().join("sub");
        runtime.create_dir_all(&sub_dir).unwrap();
        runtime.write(&sub_dir.join("file"), b"x").unwrap();

        assert!(runtime.remove_dir(&sub_dir).is_err());
        assert!(runtime.exists(&sub_dir));
    }

    #[test]
    fn test_entry_kind_reports_read_only_and_missing() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("locked.txt");
        runtime.write(&file_path, b"data").unwrap();

        runtime.set_read_only(&file_path, true).unwrap();
        assert_eq!(
            runtime.entry_kind(&file_path).unwrap(),
            EntryKind::File { read_only: true }
        );

        runtime.set_read_only(&file_path, false).unwrap();
        assert_eq!(
            runtime.entry_kind(&file_path).unwrap(),
            EntryKind::File { read_only: false }
        );

        let err = runtime.entry_kind(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_real_runtime_streams() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("stream.txt");

        {
            let mut writer = runtime.create_file(&file_path).unwrap();
            writer.write_all(b"stream content").unwrap();
        }

        let mut reader = runtime.open(&file_path).unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "stream content");
    }

    #[test]
    #[cfg(unix)]
    fn test_set_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("tool");
        runtime.write(&file_path, b"#!/bin/sh").unwrap();

        runtime.set_permissions(&file_path, 0o755).unwrap();
        let mode = std::fs::metadata(&file_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
