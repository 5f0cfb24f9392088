use crate::stream::{Close, CloseHandle};
use crate::{Error, Result};
use std::collections::HashSet;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::warn;

/// A reader bundled with every handle that has to be released alongside it.
///
/// Closing releases each distinct handle exactly once, in registration order. A handle
/// registered several times (the decoded stream and the raw storage object can be the
/// same allocation) is closed only on its first occurrence. Failures do not stop the
/// remaining closes; they are all reported together as [`Error::Close`].
pub struct MultiCloser {
    reader: Box<dyn Read + Send>,
    closers: Vec<CloseHandle>,
    closed: bool,
}

impl MultiCloser {
    pub fn new<R>(reader: R, closers: Vec<CloseHandle>) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            closers,
            closed: false,
        }
    }

    pub fn close_all(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut seen = HashSet::new();
        let mut errors = Vec::new();

        for handle in &self.closers {
            let addr = Arc::as_ptr(handle) as *const () as usize;
            if !seen.insert(addr) {
                continue;
            }

            let outcome = match handle.lock() {
                Ok(mut closer) => closer.close(),
                Err(_) => Err(io::Error::other("close handle lock poisoned")),
            };
            if let Err(e) = outcome {
                warn!(error = %e, "Failed to release object handle");
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Close(errors))
        }
    }
}

impl Read for MultiCloser {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Close for MultiCloser {
    fn close(&mut self) -> io::Result<()> {
        self.close_all().map_err(Error::into_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCloser {
        calls: Arc<AtomicUsize>,
        fail_with: Option<&'static str>,
    }

    impl Close for CountingCloser {
        fn close(&mut self) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(msg) => Err(io::Error::other(msg)),
                None => Ok(()),
            }
        }
    }

    fn counting(calls: &Arc<AtomicUsize>, fail_with: Option<&'static str>) -> CloseHandle {
        Arc::new(Mutex::new(CountingCloser {
            calls: calls.clone(),
            fail_with,
        }))
    }

    #[test]
    fn test_duplicate_handle_closed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = counting(&calls, None);

        let mut mc = MultiCloser::new(
            Cursor::new(b"payload".to_vec()),
            vec![handle.clone(), handle.clone(), handle],
        );

        let mut out = Vec::new();
        mc.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");

        mc.close_all().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_closers_run_and_errors_combine() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));

        let mut mc = MultiCloser::new(
            Cursor::new(Vec::new()),
            vec![
                counting(&first, Some("first failed")),
                counting(&second, None),
                counting(&third, Some("third failed")),
            ],
        );

        let err = mc.close_all().unwrap_err();
        match err {
            Error::Close(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].to_string(), "first failed");
                assert_eq!(errors[1].to_string(), "third failed");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_close_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut mc = MultiCloser::new(Cursor::new(Vec::new()), vec![counting(&calls, None)]);

        mc.close_all().unwrap();
        mc.close_all().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_through_trait_keeps_typed_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut mc = MultiCloser::new(Cursor::new(Vec::new()), vec![counting(&calls, Some("boom"))]);

        let io_err = Close::close(&mut mc).unwrap_err();
        assert!(matches!(Error::from(io_err), Error::Close(_)));
    }
}
