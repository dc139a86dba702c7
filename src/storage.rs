//! File-backed payload storage.
//!
//! A [`FileSet`] presents the torrent payload as one flat byte range
//! `[0, size)` regardless of how many files back it. Reads and writes that
//! span file boundaries are split here; callers never deal with per-file
//! offsets.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result, StorageErrorKind};
use crate::metainfo::FileEntry;

/// One backing file, resolved to an absolute path.
#[derive(Debug, Clone)]
struct BackingFile {
    path: PathBuf,
    offset: u64,
    length: u64,
}

/// A slice of the payload mapped onto one backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSlice {
    /// Index into the file list
    pub file_index: usize,
    /// Offset within that file
    pub file_offset: u64,
    /// Bytes covered
    pub length: u64,
}

/// The payload range `[0, size)` mapped onto one or more on-disk files.
#[derive(Debug)]
pub struct FileSet {
    files: Vec<BackingFile>,
    total_size: u64,
}

impl FileSet {
    /// Open or create the backing files under `download_dir`, creating
    /// intermediate directories as needed. Files are sparse-allocated to
    /// their final length.
    ///
    /// Single-file layout: `download_dir/name`. Multi-file layout:
    /// `download_dir/name/<path components>`.
    pub async fn create(
        download_dir: &Path,
        name: &str,
        entries: &[FileEntry],
        single_file: bool,
    ) -> Result<Self> {
        validate_relative_path(Path::new(name))?;

        let mut files = Vec::with_capacity(entries.len());
        let mut total_size = 0u64;
        for entry in entries {
            let path = if single_file {
                download_dir.join(name)
            } else {
                validate_relative_path(&entry.path)?;
                download_dir.join(name).join(&entry.path)
            };

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::storage(StorageErrorKind::Io, parent, e.to_string())
                })?;
            }

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .await
                .map_err(|e| Error::storage(StorageErrorKind::Io, &path, e.to_string()))?;

            // Grow short files to their final length; the filesystem keeps
            // the hole sparse. Existing longer content is left alone.
            let current = file
                .metadata()
                .await
                .map_err(|e| Error::storage(StorageErrorKind::Io, &path, e.to_string()))?
                .len();
            if current < entry.length {
                file.set_len(entry.length)
                    .await
                    .map_err(|e| Error::storage(StorageErrorKind::Io, &path, e.to_string()))?;
            }
            tracing::debug!(path = %path.display(), length = entry.length, "opened payload file");

            files.push(BackingFile {
                path,
                offset: entry.offset,
                length: entry.length,
            });
            total_size += entry.length;
        }

        Ok(Self { files, total_size })
    }

    /// Total payload size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Map `[offset, offset + length)` onto the backing files, in order.
    pub fn slices(&self, offset: u64, length: u64) -> Result<Vec<FileSlice>> {
        let end = offset.checked_add(length).filter(|&e| e <= self.total_size);
        let Some(end) = end else {
            return Err(Error::storage(
                StorageErrorKind::OutOfRange,
                PathBuf::new(),
                format!(
                    "range {}..{} outside payload of {} bytes",
                    offset,
                    offset.saturating_add(length),
                    self.total_size
                ),
            ));
        };

        let mut out = Vec::new();
        for (file_index, file) in self.files.iter().enumerate() {
            let file_start = file.offset;
            let file_end = file.offset + file.length;
            if file_end <= offset || file_start >= end {
                continue;
            }
            let slice_start = offset.max(file_start);
            let slice_end = end.min(file_end);
            out.push(FileSlice {
                file_index,
                file_offset: slice_start - file_start,
                length: slice_end - slice_start,
            });
        }
        Ok(out)
    }

    /// Read `length` bytes starting at `offset` in the payload.
    pub async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(length as usize);
        for slice in self.slices(offset, length)? {
            let backing = &self.files[slice.file_index];
            let mut file = File::open(&backing.path).await.map_err(|e| {
                Error::storage(StorageErrorKind::Io, &backing.path, e.to_string())
            })?;
            file.seek(SeekFrom::Start(slice.file_offset))
                .await
                .map_err(|e| Error::storage(StorageErrorKind::Io, &backing.path, e.to_string()))?;
            let mut buf = vec![0u8; slice.length as usize];
            file.read_exact(&mut buf).await.map_err(|e| {
                Error::storage(StorageErrorKind::Io, &backing.path, e.to_string())
            })?;
            out.extend_from_slice(&buf);
        }
        Ok(out)
    }

    /// Write `data` starting at `offset` in the payload.
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut consumed = 0usize;
        for slice in self.slices(offset, data.len() as u64)? {
            let backing = &self.files[slice.file_index];
            let mut file = OpenOptions::new()
                .write(true)
                .open(&backing.path)
                .await
                .map_err(|e| Error::storage(StorageErrorKind::Io, &backing.path, e.to_string()))?;
            file.seek(SeekFrom::Start(slice.file_offset))
                .await
                .map_err(|e| Error::storage(StorageErrorKind::Io, &backing.path, e.to_string()))?;
            let end = consumed + slice.length as usize;
            file.write_all(&data[consumed..end]).await.map_err(|e| {
                Error::storage(StorageErrorKind::Io, &backing.path, e.to_string())
            })?;
            file.flush().await.map_err(|e| {
                Error::storage(StorageErrorKind::Io, &backing.path, e.to_string())
            })?;
            consumed = end;
        }
        Ok(())
    }
}

/// Reject path components that would escape the download directory.
fn validate_relative_path(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(Error::storage(
                    StorageErrorKind::PathTraversal,
                    path,
                    "path contains a parent-directory component",
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::storage(
                    StorageErrorKind::PathTraversal,
                    path,
                    "path is absolute",
                ));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(lengths: &[u64]) -> Vec<FileEntry> {
        let mut offset = 0;
        lengths
            .iter()
            .enumerate()
            .map(|(i, &length)| {
                let entry = FileEntry {
                    path: PathBuf::from(format!("f{i}")),
                    length,
                    offset,
                };
                offset += length;
                entry
            })
            .collect()
    }

    #[tokio::test]
    async fn creates_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut entries = entries(&[3, 2]);
        entries[0].path = PathBuf::from("sub/x");
        entries[1].path = PathBuf::from("y");

        let fs = FileSet::create(dir.path(), "t", &entries, false)
            .await
            .unwrap();
        assert_eq!(fs.total_size(), 5);
        assert!(dir.path().join("t/sub/x").is_file());
        assert!(dir.path().join("t/y").is_file());
    }

    #[tokio::test]
    async fn splits_ranges_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSet::create(dir.path(), "t", &entries(&[4, 4, 4]), false)
            .await
            .unwrap();

        // one write spanning all three files
        fs.write(2, b"abcdefgh").await.unwrap();
        assert_eq!(fs.read(2, 8).await.unwrap(), b"abcdefgh");

        let slices = fs.slices(2, 8).unwrap();
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0], FileSlice { file_index: 0, file_offset: 2, length: 2 });
        assert_eq!(slices[1], FileSlice { file_index: 1, file_offset: 0, length: 4 });
        assert_eq!(slices[2], FileSlice { file_index: 2, file_offset: 0, length: 2 });
    }

    #[tokio::test]
    async fn fresh_files_read_as_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSet::create(dir.path(), "z.bin", &entries(&[6]), true)
            .await
            .unwrap();
        assert_eq!(fs.read(0, 6).await.unwrap(), vec![0u8; 6]);
    }

    #[tokio::test]
    async fn rejects_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSet::create(dir.path(), "t", &entries(&[4]), true)
            .await
            .unwrap();
        assert!(fs.read(0, 5).await.is_err());
        assert!(fs.read(4, 1).await.is_err());
        assert!(fs.write(3, b"ab").await.is_err());
        assert!(fs.read(0, 4).await.is_ok());
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(validate_relative_path(Path::new("ok/sub/file")).is_ok());
        assert!(validate_relative_path(Path::new("../up")).is_err());
        assert!(validate_relative_path(Path::new("a/../../b")).is_err());
        assert!(validate_relative_path(Path::new("/abs")).is_err());
    }

    #[tokio::test]
    async fn existing_content_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let fs = FileSet::create(dir.path(), "keep", &entries(&[4]), true)
                .await
                .unwrap();
            fs.write(0, b"data").await.unwrap();
        }
        let fs = FileSet::create(dir.path(), "keep", &entries(&[4]), true)
            .await
            .unwrap();
        assert_eq!(fs.read(0, 4).await.unwrap(), b"data");
    }
}
