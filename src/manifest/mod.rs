//! Manifests: the list of files a product placed on disk.
//!
//! One normalized absolute path per line, after a `; setupkeep` header.
//! Blank lines and lines starting with `;` are ignored when reading, as is a
//! leading UTF-8 BOM.

pub mod refcount;

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::product::ProductId;
use crate::runtime::{Runtime, normalize_path};

pub use refcount::GlobalRefCounter;

pub const MANIFEST_HEADER: &str = "; setupkeep";
pub const MANIFEST_EXTENSION: &str = "txt";
const PARTIAL_SUFFIX: &str = "partial";

/// Location of the manifest for `id` inside `manifest_dir`.
pub fn manifest_path(manifest_dir: &Path, id: &ProductId) -> PathBuf {
    manifest_dir.join(format!("{}.{}", id, MANIFEST_EXTENSION))
}

/// Writes a new manifest.
///
/// Entries go to a sibling `.partial` file that replaces the manifest on
/// [`commit`](Self::commit), so readers never see a half-written list. A
/// writer dropped without being committed deletes its partial file.
pub struct ManifestWriter<'a, R: Runtime> {
    runtime: &'a R,
    path: PathBuf,
    partial_path: PathBuf,
    file: Option<BufWriter<Box<dyn Write + Send>>>,
}

impl<'a, R: Runtime> ManifestWriter<'a, R> {
    #[tracing::instrument(skip(runtime))]
    pub fn create(runtime: &'a R, path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            runtime.create_dir_all(parent)?;
        }

        let mut partial = path.as_os_str().to_owned();
        partial.push(".");
        partial.push(PARTIAL_SUFFIX);
        let partial_path = PathBuf::from(partial);

        let mut writer = Self {
            runtime,
            path: path.to_path_buf(),
            file: Some(BufWriter::new(runtime.create_file(&partial_path)?)),
            partial_path,
        };
        // A failure from here on leaves a file behind that Drop cleans up
        if let Some(file) = writer.file.as_mut() {
            writeln!(file, "{}", MANIFEST_HEADER)?;
        }
        Ok(writer)
    }

    /// Append one line per path. Does nothing once the writer is closed.
    ///
    /// Paths that are not valid Unicode cannot be listed and fail with
    /// `InvalidData`.
    pub fn add_entries<'p, I>(&mut self, paths: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'p PathBuf>,
    {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        for path in paths {
            let normalized = normalize_path(path);
            let Some(line) = normalized.to_str() else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("cannot list non-Unicode path {}", normalized.display()),
                ));
            };
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    /// Flush buffered entries without publishing the manifest.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    /// Flush, close and publish the manifest under its final name.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub fn commit(mut self) -> io::Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let flushed = file.flush();
        drop(file);
        let published =
            flushed.and_then(|()| self.runtime.rename(&self.partial_path, &self.path));
        if published.is_err() {
            self.remove_partial();
        }
        published
    }

    /// Close and delete the unfinished manifest.
    pub fn discard(mut self) {
        self.file.take();
        self.remove_partial();
    }

    fn remove_partial(&self) {
        match self.runtime.remove_file(&self.partial_path) {
            Ok(()) => debug!("Discarded manifest {}", self.partial_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to delete unfinished manifest {}: {}",
                self.partial_path.display(),
                e
            ),
        }
    }
}

impl<R: Runtime> Drop for ManifestWriter<'_, R> {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            self.remove_partial();
        }
    }
}

/// Lazily yields the paths listed in a manifest.
pub struct ManifestReader {
    reader: BufReader<Box<dyn io::Read + Send>>,
    first_line: bool,
    done: bool,
}

impl ManifestReader {
    pub fn open<R: Runtime>(runtime: &R, path: &Path) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(runtime.open(path)?),
            first_line: true,
            done: false,
        })
    }
}

impl Iterator for ManifestReader {
    type Item = io::Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let mut text = line.as_str();
                    if self.first_line {
                        self.first_line = false;
                        text = text.strip_prefix('\u{feff}').unwrap_or(text);
                    }
                    let text = text.trim_end_matches(['\r', '\n']);
                    if text.trim().is_empty() || text.starts_with(';') {
                        continue;
                    }
                    return Some(Ok(PathBuf::from(text)));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Read a whole manifest.
pub fn read_manifest<R: Runtime>(runtime: &R, path: &Path) -> io::Result<Vec<PathBuf>> {
    ManifestReader::open(runtime, path)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read_manifest() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifests").join("ABC123.txt");
        let entries = vec![
            dir.path().join("app").join("a.txt"),
            dir.path().join("app").join("sub").join("..").join("b.txt"),
        ];

        let mut writer = ManifestWriter::create(&runtime, &path).unwrap();
        writer.add_entries(&entries).unwrap();
        writer.commit().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("; setupkeep\n"));

        let read = read_manifest(&runtime, &path).unwrap();
        assert_eq!(
            read,
            vec![
                dir.path().join("app").join("a.txt"),
                dir.path().join("app").join("b.txt"),
            ]
        );
    }

    #[test]
    fn test_manifest_not_visible_before_commit() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("ABC123.txt");

        let mut writer = ManifestWriter::create(&runtime, &path).unwrap();
        writer.add_entries(&[dir.path().join("a")]).unwrap();
        assert!(!path.exists());

        writer.commit().unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("ABC123.txt.partial").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_non_unicode_entry_is_refused() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("ABC123.txt");
        let bad = dir.path().join(OsStr::from_bytes(b"bad\xff.dll"));

        let mut writer = ManifestWriter::create(&runtime, &path).unwrap();
        let err = writer.add_entries(&[bad]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        writer.discard();
        assert!(!path.exists());
    }

    #[test]
    fn test_discard_and_drop_remove_partial_file() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("ABC123.txt");

        let writer = ManifestWriter::create(&runtime, &path).unwrap();
        writer.discard();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        {
            let mut writer = ManifestWriter::create(&runtime, &path).unwrap();
            writer.add_entries(&[dir.path().join("a")]).unwrap();
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_replaces_previous_manifest() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("ABC123.txt");
        fs::write(&path, "; setupkeep\n/old/file\n").unwrap();

        let mut writer = ManifestWriter::create(&runtime, &path).unwrap();
        writer.add_entries(&[PathBuf::from("/new/file")]).unwrap();
        writer.commit().unwrap();

        assert_eq!(
            read_manifest(&runtime, &path).unwrap(),
            vec![PathBuf::from("/new/file")]
        );
    }

    #[test]
    fn test_reader_skips_bom_comments_blanks_and_crlf() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.txt");
        fs::write(
            &path,
            "\u{feff}; setupkeep\r\n\r\n/opt/app/a.txt\r\n   \n; note\n/opt/app/b.txt",
        )
        .unwrap();

        let read = read_manifest(&runtime, &path).unwrap();
        assert_eq!(
            read,
            vec![PathBuf::from("/opt/app/a.txt"), PathBuf::from("/opt/app/b.txt")]
        );
    }

    #[test]
    fn test_bom_only_stripped_on_first_line() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.txt");
        fs::write(&path, "\u{feff}/a\n\u{feff}/b\n").unwrap();

        let read = read_manifest(&runtime, &path).unwrap();
        assert_eq!(read, vec![PathBuf::from("/a"), PathBuf::from("\u{feff}/b")]);
    }

    #[test]
    fn test_open_missing_manifest_is_not_found() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let err = ManifestReader::open(&runtime, &dir.path().join("missing.txt"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_failed_rename_removes_partial_file() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/data/ABC.txt");
        let partial = PathBuf::from("/data/ABC.txt.partial");

        runtime.expect_create_dir_all().returning(|_| Ok(()));
        runtime
            .expect_create_file()
            .with(eq(partial.clone()))
            .returning(|_| Ok(Box::new(io::sink())));
        runtime
            .expect_rename()
            .returning(|_, _| Err(io::Error::from(io::ErrorKind::PermissionDenied)));
        runtime
            .expect_remove_file()
            .with(eq(partial))
            .times(1)
            .returning(|_| Ok(()));

        let writer = ManifestWriter::create(&runtime, &path).unwrap();
        let err = writer.commit().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_manifest_path() {
        let id: ProductId = "ABC123".parse().unwrap();
        assert_eq!(
            manifest_path(Path::new("/data"), &id),
            PathBuf::from("/data/ABC123.txt")
        );
    }
}
