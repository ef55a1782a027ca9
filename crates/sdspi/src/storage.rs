//! Backing storage for the emulated SD card.
//!
//! The card only needs byte-addressed positional reads and writes plus the image size.
//! Reads and writes report how many bytes were actually transferred so that the card can
//! detect (and log) short transfers at the end of an image, the same way a C `fread`
//! would.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// A random-access disk image owned by the SD card
pub trait BackingStore: fmt::Debug {
    /// Size of the image in bytes
    fn size(&mut self) -> io::Result<u64>;

    /// Read up to `buf.len()` bytes at `offset`, returning the number of bytes read
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes at `offset`, returning the number of bytes written
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Push buffered writes down to the medium
    fn flush(&mut self) -> io::Result<()>;
}

/// Disk image backed by a host file, opened read/write
#[derive(Debug)]
pub struct FileStore {
    file: File,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!("Opened SD card image: {:?}", path);
        Ok(Self { file })
    }
}

impl BackingStore for FileStore {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.write(&buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Disk image held entirely in memory
///
/// Writes never grow the image: bytes past the end are dropped and reported as a short
/// write.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Vec<u8>,
}

impl MemoryStore {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Zero-filled image of `len` bytes
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl BackingStore for MemoryStore {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(available) = self.data.get(start..) else {
            return Ok(0);
        };
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(available) = self.data.get_mut(start..) else {
            return Ok(0);
        };
        let n = available.len().min(buf.len());
        available[..n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_reports_short_transfers_at_end_of_image() {
        let mut store = MemoryStore::new((0..16).collect());
        let mut buf = [0u8; 8];

        assert_eq!(store.read_at(12, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[12, 13, 14, 15]);
        assert_eq!(store.read_at(32, &mut buf).unwrap(), 0);

        assert_eq!(store.write_at(14, &[0xAA; 4]).unwrap(), 2);
        assert_eq!(store.size().unwrap(), 16);
        assert_eq!(&store.as_bytes()[13..], &[13, 0xAA, 0xAA]);
    }

    #[test]
    fn file_store_reads_back_what_it_wrote() {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(&[0u8; 1024]).unwrap();

        let mut store = FileStore::open(image.path()).unwrap();
        assert_eq!(store.size().unwrap(), 1024);
        assert_eq!(store.write_at(512, &[0x5A; 512]).unwrap(), 512);
        store.flush().unwrap();

        let mut buf = [0u8; 512];
        assert_eq!(store.read_at(512, &mut buf).unwrap(), 512);
        assert_eq!(buf, [0x5A; 512]);
        assert_eq!(store.read_at(1000, &mut buf).unwrap(), 24);
    }

    #[test]
    fn file_store_open_fails_for_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileStore::open(dir.path().join("missing.img")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
