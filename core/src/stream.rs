use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

/// Explicit release of an underlying resource (file handle, connection, decoder state).
pub trait Close {
    fn close(&mut self) -> io::Result<()>;
}

impl<T: Close + ?Sized> Close for Box<T> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// A readable object body that must be closed once the caller is done with it.
pub trait ObjectReader: Read + Close + Send {}

impl<T: Read + Close + Send + ?Sized> ObjectReader for T {}

/// A writer layer (compressor, encryptor) that emits trailing data when finished.
/// Finishing never closes the sink the layer writes into.
pub trait StreamWriter: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

pub type CloseHandle = Arc<Mutex<dyn Close + Send>>;

/// Adds a no-op `close` to a reader that owns nothing worth releasing.
pub struct NopCloser<R> {
    inner: R,
}

impl<R: Read> NopCloser<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for NopCloser<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R> Close for NopCloser<R> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Cloneable handle over one object reader.
///
/// Clones share the same underlying reader, so one clone can be layered under a decoder
/// while another is registered with a [`MultiCloser`](crate::closer::MultiCloser) for release.
#[derive(Clone)]
pub struct SharedReader {
    inner: Arc<Mutex<Box<dyn ObjectReader>>>,
}

impl SharedReader {
    pub fn new(reader: Box<dyn ObjectReader>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reader)),
        }
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::new(Box::new(NopCloser::new(reader)))
    }

    pub fn handle(&self) -> CloseHandle {
        self.inner.clone()
    }

    pub fn same_as(&self, other: &SharedReader) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Read for SharedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("reader lock poisoned"))?;
        guard.read(buf)
    }
}

impl Close for SharedReader {
    fn close(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("reader lock poisoned"))?;
        guard.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_shared_reader_clones_share_position() {
        let mut a = SharedReader::from_reader(Cursor::new(b"abcdef".to_vec()));
        let mut b = a.clone();

        let mut first = [0u8; 3];
        a.read_exact(&mut first).unwrap();
        let mut rest = Vec::new();
        b.read_to_end(&mut rest).unwrap();

        assert_eq!(&first, b"abc");
        assert_eq!(rest, b"def");
        assert!(a.same_as(&b));
    }

    #[test]
    fn test_nop_closer_close_is_ok() {
        let mut reader = NopCloser::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.close().is_ok());
        assert!(reader.close().is_ok());
    }
}
