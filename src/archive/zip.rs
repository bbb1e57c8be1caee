use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::debug;
use zip::ZipArchive;

use super::{ArchiveFormat, ExtractError, UnpackContext, entry_destination, write_entry_file};
use crate::runtime::Runtime;

/// Extractor for .zip archives
pub struct ZipExtractor;

impl ArchiveFormat for ZipExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".zip")
    }

    fn unpack<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        destination: &Path,
        context: &mut UnpackContext<'_>,
    ) -> Result<(), ExtractError> {
        debug!("Extracting zip archive to {:?}...", destination);
        let mut file = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

        // zip crate requires Read + Seek, but Runtime::open returns Box<dyn Read + Send>
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?;
        let mut archive =
            ZipArchive::new(Cursor::new(buffer)).context("Failed to parse ZIP archive")?;

        let mut consumed = 0u64;
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;
            consumed = consumed.saturating_add(entry.compressed_size());

            // The raw name, so escaping entries are refused instead of sanitized
            let entry_path = PathBuf::from(entry.name());
            let Some(target) = entry_destination(destination, &entry_path)? else {
                continue;
            };

            if entry.is_dir() {
                runtime
                    .create_dir_all(&target)
                    .with_context(|| format!("Failed to create {:?}", target))?;
            } else {
                write_entry_file(runtime, &target, &mut entry)?;

                // Set file permissions from archive metadata (Unix only)
                #[cfg(unix)]
                if let Some(mode) = entry.unix_mode()
                    && let Err(e) = runtime.set_permissions(&target, mode)
                {
                    debug!("Failed to set permissions on {:?}: {}", target, e);
                }
            }

            context.entry_extracted(destination, &target);
            context.advance(consumed)?;
        }
        Ok(())
    }
}
