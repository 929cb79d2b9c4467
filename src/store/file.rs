//! Local filesystem store.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::ByteRangeStore;
use crate::error::{Error, Result};

/// [`ByteRangeStore`] backed by a `std::fs::File`.
#[derive(Debug, Default)]
pub struct FileStore {
    file: Option<File>,
    path: Option<PathBuf>,
    position: u64,
}

impl FileStore {
    /// Create a closed store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the currently open file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::GenericFailure("file store is not open".into()))
    }
}

impl ByteRangeStore for FileStore {
    fn open_for_read(&mut self, path: &Path) -> Result<()> {
        self.close();
        let file = File::open(path).map_err(|e| Error::FileOpenForRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Opened file store for read");
        self.file = Some(file);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    fn open_for_read_write(&mut self, path: &Path, create_or_truncate: bool) -> Result<()> {
        self.close();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_or_truncate)
            .truncate(create_or_truncate)
            .open(path)
            .map_err(|e| Error::FileOpenForReadWrite {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(
            path = %path.display(),
            create_or_truncate,
            "Opened file store for read/write"
        );
        self.file = Some(file);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    fn move_pointer_to(&mut self, offset: u64) -> Result<()> {
        let file = self.file_mut().map_err(|e| Error::FileMovePointer {
            offset,
            reason: e.to_string(),
        })?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::FileMovePointer {
                offset,
                reason: e.to_string(),
            })?;
        self.position = offset;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let offset = self.position;
        let file = self.file_mut()?;

        // Fill the buffer unless EOF is reached
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::FileRead {
                        offset,
                        reason: e.to_string(),
                    })
                }
            }
        }

        self.position += total as u64;
        Ok(total)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        let offset = self.position;
        let file = self.file_mut()?;
        file.write_all(buf).map_err(|e| Error::FileWrite {
            offset,
            reason: e.to_string(),
        })?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn file_size(&self) -> Result<u64> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| Error::GenericFailure("file store is not open".into()))?;
        Ok(file.metadata()?.len())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = ?self.path, "Closed file store");
        }
        self.path = None;
        self.position = 0;
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn flush(&mut self) -> Result<()> {
        let file = self.file_mut()?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
