use std::cell::Cell;
use std::io::{self, Read};
use std::path::Path;
use std::rc::Rc;

use anyhow::Context;
use flate2::read::GzDecoder;
use log::{debug, warn};
use tar::Archive;

use super::{ArchiveFormat, ExtractError, UnpackContext, entry_destination, write_entry_file};
use crate::runtime::Runtime;

/// Extractor for .tar.gz / .tgz archives
pub struct TarGzExtractor;

/// Counts the compressed bytes pulled from the archive file.
struct CountingReader<R> {
    inner: R,
    consumed: Rc<Cell<u64>>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.consumed.set(self.consumed.get() + read as u64);
        Ok(read)
    }
}

impl ArchiveFormat for TarGzExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".tar.gz") || name.ends_with(".tgz")
    }

    fn unpack<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        destination: &Path,
        context: &mut UnpackContext<'_>,
    ) -> Result<(), ExtractError> {
        debug!("Extracting tar.gz archive to {:?}...", destination);
        let file = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

        let consumed = Rc::new(Cell::new(0));
        let reader = CountingReader {
            inner: file,
            consumed: Rc::clone(&consumed),
        };
        let mut archive = Archive::new(GzDecoder::new(reader));
        let entries = archive
            .entries()
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?;

        for entry in entries {
            let mut entry =
                entry.with_context(|| format!("Failed to read entry in {:?}", archive_path))?;
            let entry_path = entry
                .path()
                .context("Archive entry has an invalid path")?
                .into_owned();
            let Some(target) = entry_destination(destination, &entry_path)? else {
                continue;
            };

            let entry_type = entry.header().entry_type();
            if entry_type.is_dir() {
                runtime
                    .create_dir_all(&target)
                    .with_context(|| format!("Failed to create {:?}", target))?;
            } else if entry_type.is_file() {
                write_entry_file(runtime, &target, &mut entry)?;

                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode()
                    && let Err(e) = runtime.set_permissions(&target, mode)
                {
                    debug!("Failed to set permissions on {:?}: {}", target, e);
                }
            } else {
                warn!(
                    "Skipping unsupported entry {:?} ({:?})",
                    entry_path, entry_type
                );
                continue;
            }

            context.entry_extracted(destination, &target);
            context.advance(consumed.get())?;
        }
        Ok(())
    }
}
