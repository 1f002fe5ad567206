#![forbid(unsafe_code)]

//! Positioned file access underneath the page cache.

use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};

use crate::types::{Result, StoreError};

/// Positioned reads and writes on a store file.
///
/// The checker only ever reads; writes exist so stores can be laid out by
/// [`GraphBuilder`](crate::storage::GraphBuilder).
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from `off`; a short file is an `UnexpectedEof` error.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes written data to durable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current length in bytes.
    fn len(&self) -> Result<u64>;
    /// `true` when the length is zero.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Resizes the file to `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
mod sys {
    use std::{fs::File, io, os::unix::fs::FileExt};

    pub fn read(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
        file.read_at(dst, off)
    }

    pub fn write(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
        file.write_at(src, off)
    }
}

#[cfg(windows)]
mod sys {
    use std::{fs::File, io, os::windows::fs::FileExt};

    pub fn read(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
        file.seek_read(dst, off)
    }

    pub fn write(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
        file.seek_write(src, off)
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::{fs::File, io};

    pub fn read(_file: &File, _dst: &mut [u8], _off: u64) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "positioned reads unsupported"))
    }

    pub fn write(_file: &File, _src: &[u8], _off: u64) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "positioned writes unsupported"))
    }
}

/// A store file on disk, shareable across worker threads.
#[derive(Clone)]
pub struct StdFileIo {
    file: Arc<File>,
}

impl StdFileIo {
    /// Wraps an open file.
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(file),
        }
    }

    /// Opens `path` for reading and writing, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }

    /// Opens an existing file for checking.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(OpenOptions::new().read(true).open(path)?))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            let read = sys::read(&self.file, dst, off)?;
            if read == 0 {
                return Err(io::Error::new(ErrorKind::UnexpectedEof, "read past end of file").into());
            }
            dst = &mut dst[read..];
            off += read as u64;
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            let written = sys::write(&self.file, src, off)?;
            if written == 0 {
                return Err(io::Error::new(ErrorKind::WriteZero, "wrote zero bytes").into());
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        Ok(self.file.set_len(len)?)
    }
}

/// Growable in-memory file used by tests and generated stores.
#[derive(Clone, Default)]
pub struct MemIo {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemIo {
    /// Creates an empty in-memory file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl FileIo for MemIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let data = self.data.read();
        let start = usize::try_from(off).map_err(|_| StoreError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(dst.len())
            .ok_or(StoreError::Invalid("offset overflow"))?;
        if end > data.len() {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                "read past end of in-memory file",
            )));
        }
        dst.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let start = usize::try_from(off).map_err(|_| StoreError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(src.len())
            .ok_or(StoreError::Invalid("offset overflow"))?;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let len = usize::try_from(len).map_err(|_| StoreError::Invalid("length overflow"))?;
        self.data.write().resize(len, 0);
        Ok(())
    }
}

/// Wrapper that fails reads touching selected byte regions.
///
/// Used to inject unreadable pages underneath a page cache.
pub struct FaultyIo<F: FileIo> {
    inner: F,
    region_len: u64,
    failing: Mutex<HashSet<u64>>,
}

impl<F: FileIo> FaultyIo<F> {
    /// Wraps `inner`; failures are configured per region of `region_len` bytes.
    pub fn new(inner: F, region_len: u64) -> Self {
        Self {
            inner,
            region_len: region_len.max(1),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every read overlapping region `index` fail.
    pub fn fail_region(&self, index: u64) {
        self.failing.lock().insert(index);
    }

    /// Clears all injected failures.
    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    fn overlaps_failure(&self, off: u64, len: usize) -> bool {
        if len == 0 {
            return false;
        }
        let first = off / self.region_len;
        let last = (off + len as u64 - 1) / self.region_len;
        let failing = self.failing.lock();
        (first..=last).any(|region| failing.contains(&region))
    }
}

impl<F: FileIo> FileIo for FaultyIo<F> {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        if self.overlaps_failure(off, dst.len()) {
            return Err(StoreError::Io(io::Error::other("injected read failure")));
        }
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.inner.write_at(off, src)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.truncate(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = StdFileIo::open(&path).unwrap();

        let payload = b"hello mundo";
        io.write_at(0, payload).unwrap();
        io.sync_all().unwrap();

        let mut buf = vec![0u8; payload.len()];
        io.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, payload);
        assert!(io.len().unwrap() >= payload.len() as u64);
    }

    #[test]
    fn read_past_eof_returns_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = StdFileIo::open(&path).unwrap();
        let mut buf = [0u8; 8];
        let err = io.read_at(0, &mut buf).unwrap_err();
        match err {
            StoreError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn mem_io_grows_on_write() {
        let io = MemIo::new();
        io.write_at(10, &[1, 2, 3]).unwrap();
        assert_eq!(io.len().unwrap(), 13);
        let mut buf = [0u8; 3];
        io.read_at(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert!(io.read_at(12, &mut buf).is_err());
    }

    #[test]
    fn faulty_io_fails_only_marked_regions() {
        let io = FaultyIo::new(MemIo::new(), 16);
        io.write_at(0, &[7u8; 64]).unwrap();
        io.fail_region(2);
        let mut buf = [0u8; 16];
        io.read_at(0, &mut buf).unwrap();
        assert!(io.read_at(32, &mut buf).is_err());
        assert!(io.read_at(24, &mut buf).is_err());
        io.heal();
        io.read_at(32, &mut buf).unwrap();
    }
}
