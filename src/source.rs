// SPDX-License-Identifier: MIT
//! Random-access byte sources for decoding

use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Positioned reads over a RAC file
///
/// Shared by every decode worker, so reads take `&self`.
pub trait ChunkSource: Send + Sync {
    /// Total length of the file in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from `offset`, failing if the file ends first
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn read_vec_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<T: ChunkSource + ?Sized> ChunkSource for &T {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<T: ChunkSource + ?Sized> ChunkSource for Arc<T> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// A RAC file held in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<Bytes> for MemorySource {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl ChunkSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).ok().filter(|&s| s <= self.data.len());
        let region = start
            .and_then(|s| self.data.get(s..s.checked_add(buf.len())?))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "read of {} bytes at offset {} past end of {}-byte source",
                        buf.len(),
                        offset,
                        self.data.len()
                    ),
                )
            })?;
        buf.copy_from_slice(region);
        Ok(())
    }
}

/// A RAC file on disk; reads seek under a lock
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::from_file(File::open(path)?)
    }

    pub fn from_file(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ChunkSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_source_reads() {
        let source = MemorySource::from(b"0123456789".to_vec());
        assert_eq!(source.len(), 10);
        assert_eq!(source.read_vec_at(3, 4).unwrap(), b"3456");
        assert_eq!(source.read_vec_at(10, 0).unwrap(), b"");
    }

    #[test]
    fn test_memory_source_past_end() {
        let source = MemorySource::from(b"0123456789".to_vec());
        let err = source.read_vec_at(8, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(source.read_vec_at(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_file_source_reads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello random access").unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).unwrap();
        assert_eq!(source.len(), 19);
        assert_eq!(source.read_vec_at(6, 6).unwrap(), b"random");
        assert!(source.read_vec_at(15, 10).is_err());
    }
}
