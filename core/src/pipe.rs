use crate::Error;
use crossbeam::channel::{Receiver, Sender, bounded};
use std::io::{self, Read, Write};
use std::thread;

/// Number of in-flight writes the pipe holds before the writer blocks.
const PIPE_CAPACITY: usize = 1;

enum Message {
    Data(Vec<u8>),
    Abort(io::Error),
}

/// Creates a blocking, bounded in-memory pipe.
///
/// The writer blocks once the reader falls behind, which keeps a producer thread from
/// buffering more than one write ahead. Dropping the writer ends the stream; aborting it
/// hands an error to the reader instead, as does dropping it while its thread unwinds.
/// Dropping the reader makes further writes fail with `BrokenPipe`.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(PIPE_CAPACITY);
    (
        PipeWriter { tx: Some(tx) },
        PipeReader {
            rx,
            buf: Vec::new(),
            pos: 0,
            failed: None,
        },
    )
}

pub struct PipeWriter {
    tx: Option<Sender<Message>>,
}

impl PipeWriter {
    /// Ends the stream with `err`; the reader sees it on its next read.
    pub fn close_with_error(mut self, err: io::Error) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Abort(err));
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if thread::panicking() {
            if let Some(tx) = self.tx.take() {
                let _ = tx.send(Message::Abort(io::Error::other("pipeline producer panicked")));
            }
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe writer closed"))?;
        tx.send(Message::Data(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct PipeReader {
    rx: Receiver<Message>,
    buf: Vec<u8>,
    pos: usize,
    failed: Option<Error>,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        while self.pos >= self.buf.len() {
            if let Some(failure) = &self.failed {
                return Err(failure.replay().into_io());
            }
            match self.rx.recv() {
                Ok(Message::Data(data)) => {
                    self.buf = data;
                    self.pos = 0;
                }
                Ok(Message::Abort(err)) => {
                    let failure = Error::from(err);
                    let err = failure.replay().into_io();
                    self.failed = Some(failure);
                    return Err(err);
                }
                // Writer dropped without error: end of stream.
                Err(_) => return Ok(0),
            }
        }

        let n = (self.buf.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
