//! Random-access byte source underneath the block store.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;

/// Positioned reads against the file.  Implementations must be shareable.
pub trait ReadAt: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn len(&self) -> io::Result<u64>;

    fn read_vec(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Adapts any `Read + Seek` stream.  The single cursor is serialized behind a
/// mutex, so concurrent readers take turns.
pub struct SeekSource<R> {
    inner: Mutex<R>,
}

impl<R: Read + Seek + Send> SeekSource<R> {
    pub fn new(reader: R) -> Self {
        Self { inner: Mutex::new(reader) }
    }

    pub fn into_inner(self) -> io::Result<R> {
        self.inner.into_inner().map_err(|_| poisoned())
    }
}

impl<R: Read + Seek + Send> ReadAt for SeekSource<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut reader = self.inner.lock().map_err(|_| poisoned())?;
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(buf)
    }

    fn len(&self) -> io::Result<u64> {
        let mut reader = self.inner.lock().map_err(|_| poisoned())?;
        reader.seek(SeekFrom::End(0))
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "byte source lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn positioned_reads_ignore_previous_cursor() {
        let source = SeekSource::new(Cursor::new((0u8..64).collect::<Vec<_>>()));
        assert_eq!(source.read_vec(10, 3).unwrap(), vec![10, 11, 12]);
        assert_eq!(source.read_vec(2, 2).unwrap(), vec![2, 3]);
        assert_eq!(source.len().unwrap(), 64);
        assert!(source.read_vec(60, 8).is_err());
    }
}
