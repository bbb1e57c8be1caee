//! Default extraction binding.
//!
//! [`ArchiveExtractorImpl`] unpacks `.tar.gz`/`.tgz` and `.zip` archives into
//! one destination, reporting progress in archive bytes and every file or
//! directory it writes through [`ExtractionEvents`].

mod tar_gz;
mod zip;

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, anyhow};
use log::debug;
use thiserror::Error;

use crate::progress::Processing;
use crate::runtime::Runtime;

pub use tar_gz::TarGzExtractor;
pub use zip::ZipExtractor;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extraction cancelled")]
    Cancelled,

    #[error("unsupported archive format: {}", .0.display())]
    Unsupported(PathBuf),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Receives progress and results while archives are unpacked.
pub trait ExtractionEvents {
    fn set_total(&mut self, total: u64);
    fn set_completed(&mut self, completed: u64) -> Processing;
    /// A file or directory entry was written to `path`.
    fn entry_extracted(&mut self, path: &Path);
}

/// Unpacks a list of archives into one directory.
pub trait Extractor {
    fn extract(
        &self,
        archives: &[PathBuf],
        destination: &Path,
        events: &mut dyn ExtractionEvents,
    ) -> Result<(), ExtractError>;
}

/// Format-specific unpacking of a single archive.
pub trait ArchiveFormat {
    /// Check if this format handles the given archive
    fn can_handle(&self, archive_path: &Path) -> bool;

    fn unpack<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        destination: &Path,
        context: &mut UnpackContext<'_>,
    ) -> Result<(), ExtractError>;
}

/// Progress position and event sink for the archive being unpacked.
pub struct UnpackContext<'e> {
    events: &'e mut dyn ExtractionEvents,
    base: u64,
    reported: HashSet<PathBuf>,
}

impl UnpackContext<'_> {
    /// Report `path` along with the directories leading to it from
    /// `destination`, outermost first. Each path is reported once.
    pub fn entry_extracted(&mut self, destination: &Path, path: &Path) {
        if let Some(relative) = path.parent().and_then(|parent| parent.strip_prefix(destination).ok()) {
            let mut dir = destination.to_path_buf();
            for component in relative.components() {
                dir.push(component);
                self.report(&dir);
            }
        }
        self.report(path);
    }

    fn report(&mut self, path: &Path) {
        if self.reported.insert(path.to_path_buf()) {
            self.events.entry_extracted(path);
        }
    }

    /// Report `consumed` bytes of the current archive as done.
    pub fn advance(&mut self, consumed: u64) -> Result<(), ExtractError> {
        match self.events.set_completed(self.base.saturating_add(consumed)) {
            Processing::Continue => Ok(()),
            Processing::Cancel => Err(ExtractError::Cancelled),
        }
    }
}

/// Dispatcher that selects the appropriate format for each archive.
pub struct ArchiveExtractorImpl<'a, R: Runtime> {
    runtime: &'a R,
    tar_gz: TarGzExtractor,
    zip: ZipExtractor,
}

impl<'a, R: Runtime> ArchiveExtractorImpl<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self {
            runtime,
            tar_gz: TarGzExtractor,
            zip: ZipExtractor,
        }
    }

    pub fn can_handle(&self, archive_path: &Path) -> bool {
        self.tar_gz.can_handle(archive_path) || self.zip.can_handle(archive_path)
    }
}

impl<R: Runtime> Extractor for ArchiveExtractorImpl<'_, R> {
    #[tracing::instrument(skip(self, events))]
    fn extract(
        &self,
        archives: &[PathBuf],
        destination: &Path,
        events: &mut dyn ExtractionEvents,
    ) -> Result<(), ExtractError> {
        if let Some(unsupported) = archives.iter().find(|archive| !self.can_handle(archive)) {
            return Err(ExtractError::Unsupported(unsupported.clone()));
        }

        let mut sizes = Vec::with_capacity(archives.len());
        for archive in archives {
            let size = self
                .runtime
                .file_size(archive)
                .with_context(|| format!("Failed to open archive {}", archive.display()))?;
            sizes.push(size);
        }
        events.set_total(sizes.iter().sum());

        self.runtime
            .create_dir_all(destination)
            .with_context(|| format!("Failed to create {}", destination.display()))?;

        let mut base = 0u64;
        for (archive, size) in archives.iter().zip(sizes) {
            debug!("Extracting {} to {}", archive.display(), destination.display());
            let mut context = UnpackContext {
                events: &mut *events,
                base,
                reported: HashSet::new(),
            };
            if self.tar_gz.can_handle(archive) {
                self.tar_gz
                    .unpack(self.runtime, archive, destination, &mut context)?;
            } else {
                self.zip
                    .unpack(self.runtime, archive, destination, &mut context)?;
            }
            base = base.saturating_add(size);
            if events.set_completed(base) == Processing::Cancel {
                return Err(ExtractError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Where an archive entry lands, or `None` for the archive root itself.
///
/// Absolute entries and entries climbing out with `..` are rejected.
pub(crate) fn entry_destination(destination: &Path, entry: &Path) -> anyhow::Result<Option<PathBuf>> {
    let mut relative = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!(
                    "Archive entry {} points outside the destination",
                    entry.display()
                ));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(destination.join(relative)))
}

/// Write one file entry, replacing a read-only file left by an earlier install.
pub(crate) fn write_entry_file<R: Runtime>(
    runtime: &R,
    path: &Path,
    content: &mut dyn Read,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        runtime
            .create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut out = match runtime.create_file(path) {
        Ok(out) => out,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied && runtime.exists(path) => {
            runtime
                .set_read_only(path, false)
                .with_context(|| format!("Failed to replace {}", path.display()))?;
            runtime
                .create_file(path)
                .with_context(|| format!("Failed to create {}", path.display()))?
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to create {}", path.display()));
        }
    };

    io::copy(content, &mut out).with_context(|| format!("Failed to extract {}", path.display()))?;
    out.flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use crate::test_utils::{RecordingEvents, create_tar_gz, create_zip};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_extractor_impl_can_handle() {
        let runtime = RealRuntime;
        let extractor = ArchiveExtractorImpl::new(&runtime);
        assert!(extractor.can_handle(Path::new("file.tar.gz")));
        assert!(extractor.can_handle(Path::new("FILE.TGZ")));
        assert!(extractor.can_handle(Path::new("file.zip")));
        assert!(!extractor.can_handle(Path::new("file.7z")));
    }

    #[test]
    fn test_extract_multiple_archives_in_order() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let first = dir.path().join("core.tar.gz");
        let second = dir.path().join("extras.zip");
        create_tar_gz(&first, &[("bin/tool", "tool"), ("README", "hello")]).unwrap();
        create_zip(&second, &[("share/extra.txt", "extra")]).unwrap();
        let out = dir.path().join("out");

        let mut events = RecordingEvents::default();
        let extractor = ArchiveExtractorImpl::new(&runtime);
        extractor
            .extract(&[first.clone(), second.clone()], &out, &mut events)
            .unwrap();

        assert_eq!(
            events.entries,
            vec![
                out.join("bin"),
                out.join("bin").join("tool"),
                out.join("README"),
                out.join("share"),
                out.join("share").join("extra.txt"),
            ]
        );
        assert_eq!(fs::read_to_string(out.join("README")).unwrap(), "hello");

        let total = fs::metadata(&first).unwrap().len() + fs::metadata(&second).unwrap().len();
        assert_eq!(events.total, Some(total));
        assert_eq!(events.completed.last(), Some(&total));
        assert!(events.completed.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_unsupported_archive_extracts_nothing() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.tar.gz");
        create_tar_gz(&good, &[("a.txt", "a")]).unwrap();
        let out = dir.path().join("out");

        let mut events = RecordingEvents::default();
        let err = ArchiveExtractorImpl::new(&runtime)
            .extract(&[good, dir.path().join("bad.rar")], &out, &mut events)
            .unwrap_err();

        assert!(matches!(err, ExtractError::Unsupported(_)));
        assert!(err.to_string().contains("unsupported archive format"));
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_archive_fails() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let mut events = RecordingEvents::default();
        let err = ArchiveExtractorImpl::new(&runtime)
            .extract(
                &[dir.path().join("missing.zip")],
                &dir.path().join("out"),
                &mut events,
            )
            .unwrap_err();
        assert!(matches!(err, ExtractError::Failed(_)));
    }

    #[test]
    fn test_cancel_stops_extraction() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        create_tar_gz(&archive, &[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]).unwrap();

        let mut events = RecordingEvents {
            cancel_after: Some(1),
            ..Default::default()
        };
        let err = ArchiveExtractorImpl::new(&runtime)
            .extract(&[archive], &dir.path().join("out"), &mut events)
            .unwrap_err();

        assert!(matches!(err, ExtractError::Cancelled));
        assert_eq!(events.entries.len(), 1);
    }

    #[test]
    fn test_entry_destination() {
        let dest = Path::new("/opt/app");
        assert_eq!(
            entry_destination(dest, Path::new("./bin/tool")).unwrap(),
            Some(PathBuf::from("/opt/app/bin/tool"))
        );
        assert_eq!(entry_destination(dest, Path::new("./")).unwrap(), None);
        assert!(entry_destination(dest, Path::new("../etc/passwd")).is_err());
        assert!(entry_destination(dest, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_write_entry_file_replaces_read_only_file() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("ro.txt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "old").unwrap();
        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&path, permissions).unwrap();

        write_entry_file(&runtime, &path, &mut "new".as_bytes()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }
}
