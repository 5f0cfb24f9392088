//! Chunked AES-256-GCM stream encryption.
//!
//! Stream layout:
//!
//! ```text
//! "AEADv1" (6 bytes) | salt (16 bytes)
//! chunk 0: nonce = 0000 || be64(0) (12 bytes) | AES-GCM(plaintext[..65536]) + tag (16 bytes)
//! chunk 1: nonce = 0000 || be64(1)            | ...
//! ```
//!
//! Every stream gets a fresh random salt, and with it a fresh Argon2id-derived key, so the
//! counter nonces never repeat under the same key. An empty plaintext is just the header.

use crate::stream::StreamWriter;
use crate::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use std::io::{self, Read, Write};
use tracing::debug;

pub const HEADER_MAGIC: &[u8; 6] = b"AEADv1";
pub const SALT_SIZE: usize = 16;
pub const HEADER_SIZE: usize = HEADER_MAGIC.len() + SALT_SIZE;
pub const CHUNK_SIZE: usize = 64 * 1024;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

pub const AES_FILE_EXT: &str = ".aes";

pub trait Crypter: Send + Sync {
    /// Writes the stream header into `sink` and returns the plaintext writer.
    fn encrypt<'a>(&self, sink: &'a mut (dyn Write + Send)) -> Result<Box<dyn StreamWriter + 'a>>;

    /// Consumes and validates the stream header, returning the plaintext reader.
    fn decrypt(&self, source: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>>;

    fn file_extension(&self) -> &'static str;

    fn name(&self) -> &'static str;
}

/// Resolves a crypter from its configured name.
pub fn crypter_by_name(name: &str, password: &str) -> Result<Box<dyn Crypter>> {
    match name {
        "aes-256-gcm" => Ok(Box::new(ChunkedGcmCrypter::new(password))),
        other => Err(Error::Config(format!("unsupported encryptor: {other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory: 64 * 1024,
            iterations: 1,
            parallelism: 4,
        }
    }
}

pub fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<[u8; KEY_SIZE]> {
    let argon2 = Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        Params::new(
            params.memory,
            params.iterations,
            params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| Error::KeyDerivation(e.to_string()))?,
    );

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    Ok(key)
}

pub fn chunk_nonce(counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

#[derive(Clone)]
pub struct ChunkedGcmCrypter {
    password: String,
    kdf: KdfParams,
}

impl ChunkedGcmCrypter {
    pub fn new(password: impl Into<String>) -> Self {
        Self::with_kdf_params(password, KdfParams::default())
    }

    /// Both sides of a stream must agree on the parameters; they are not stored in the header.
    pub fn with_kdf_params(password: impl Into<String>, kdf: KdfParams) -> Self {
        Self {
            password: password.into(),
            kdf,
        }
    }

    fn cipher_for(&self, salt: &[u8]) -> Result<Aes256Gcm> {
        let key = derive_key(&self.password, salt, &self.kdf)?;
        Aes256Gcm::new_from_slice(&key).map_err(|e| Error::KeyDerivation(e.to_string()))
    }
}

impl fmt::Debug for ChunkedGcmCrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedGcmCrypter")
            .field("password", &"<redacted>")
            .field("kdf", &self.kdf)
            .finish()
    }
}

impl Crypter for ChunkedGcmCrypter {
    fn encrypt<'a>(&self, sink: &'a mut (dyn Write + Send)) -> Result<Box<dyn StreamWriter + 'a>> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| Error::Encryption(format!("salt generation: {e}")))?;
        let cipher = self.cipher_for(&salt)?;

        sink.write_all(HEADER_MAGIC)?;
        sink.write_all(&salt)?;
        debug!(salt = %hex::encode(salt), "Started encrypted stream");

        Ok(Box::new(ChunkedGcmWriter {
            cipher,
            sink,
            buf: Vec::with_capacity(CHUNK_SIZE),
            counter: 0,
        }))
    }

    fn decrypt(&self, mut source: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        let mut header = [0u8; HEADER_SIZE];
        source.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Header(format!("stream shorter than {HEADER_SIZE} header bytes"))
            } else {
                Error::from(e)
            }
        })?;

        let (magic, salt) = header.split_at(HEADER_MAGIC.len());
        if magic != HEADER_MAGIC {
            return Err(Error::Header("invalid file header".to_string()));
        }
        let cipher = self.cipher_for(salt)?;

        Ok(Box::new(ChunkedGcmReader {
            cipher,
            source,
            counter: 0,
            plain: Vec::new(),
            pos: 0,
            failure: None,
            done: false,
        }))
    }

    fn file_extension(&self) -> &'static str {
        AES_FILE_EXT
    }

    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }
}

struct ChunkedGcmWriter<'a> {
    cipher: Aes256Gcm,
    sink: &'a mut (dyn Write + Send),
    buf: Vec<u8>,
    counter: u64,
}

impl ChunkedGcmWriter<'_> {
    fn seal_chunk(&mut self) -> io::Result<()> {
        let nonce = chunk_nonce(self.counter);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), self.buf.as_slice())
            .map_err(|_| Error::Encryption("AEAD seal failed".to_string()).into_io())?;

        self.sink.write_all(&nonce)?;
        self.sink.write_all(&ciphertext)?;

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| Error::Encryption("chunk counter exhausted".to_string()).into_io())?;
        self.buf.clear();
        Ok(())
    }
}

impl Write for ChunkedGcmWriter<'_> {
    fn write(&mut self, mut data: &[u8]) -> io::Result<usize> {
        let mut total = 0;
        while !data.is_empty() {
            let space = (CHUNK_SIZE - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..space]);
            data = &data[space..];
            total += space;

            if self.buf.len() == CHUNK_SIZE {
                self.seal_chunk()?;
            }
        }
        Ok(total)
    }

    /// Partial chunks stay buffered; sealing early would change the framing.
    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl StreamWriter for ChunkedGcmWriter<'_> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.seal_chunk()?;
        }
        debug!(chunks = self.counter, "Finished encrypted stream");
        self.sink.flush()
    }
}

enum Failure {
    Decryption(String),
    Io(io::ErrorKind, String),
}

impl Failure {
    fn to_io(&self) -> io::Error {
        match self {
            Failure::Decryption(msg) => Error::Decryption(msg.clone()).into_io(),
            Failure::Io(kind, msg) => io::Error::new(*kind, msg.clone()),
        }
    }
}

struct ChunkedGcmReader {
    cipher: Aes256Gcm,
    source: Box<dyn Read + Send>,
    counter: u64,
    plain: Vec<u8>,
    pos: usize,
    failure: Option<Failure>,
    done: bool,
}

impl ChunkedGcmReader {
    /// Returns `Ok(false)` when the source ends cleanly on a chunk boundary.
    fn next_chunk(&mut self) -> std::result::Result<bool, Failure> {
        let mut nonce = [0u8; NONCE_SIZE];
        let n = read_full(&mut self.source, &mut nonce)?;
        if n == 0 {
            return Ok(false);
        }
        if n < NONCE_SIZE {
            return Err(Failure::Decryption(format!(
                "truncated nonce in chunk {}",
                self.counter
            )));
        }
        if nonce != chunk_nonce(self.counter) {
            return Err(Failure::Decryption(format!(
                "unexpected nonce for chunk {}",
                self.counter
            )));
        }

        let mut sealed = vec![0u8; CHUNK_SIZE + TAG_SIZE];
        let n = read_full(&mut self.source, &mut sealed)?;
        sealed.truncate(n);

        self.plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| {
                Failure::Decryption("tampering or corruption detected".to_string())
            })?;
        self.pos = 0;
        self.counter += 1;
        Ok(true)
    }
}

impl Read for ChunkedGcmReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(failure) = &self.failure {
            return Err(failure.to_io());
        }
        if buf.is_empty() || self.done {
            return Ok(0);
        }

        while self.pos >= self.plain.len() {
            match self.next_chunk() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return Ok(0);
                }
                Err(failure) => {
                    let err = failure.to_io();
                    self.plain.clear();
                    self.pos = 0;
                    self.failure = Some(failure);
                    return Err(err);
                }
            }
        }

        let n = (self.plain.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Reads until `buf` is full or the source is exhausted; returns the byte count.
fn read_full(source: &mut dyn Read, buf: &mut [u8]) -> std::result::Result<usize, Failure> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Failure::from(e)),
        }
    }
    Ok(filled)
}

impl From<io::Error> for Failure {
    fn from(err: io::Error) -> Self {
        match Error::from(err) {
            Error::Decryption(msg) => Failure::Decryption(msg),
            Error::Io(e) => Failure::Io(e.kind(), e.to_string()),
            other => Failure::Io(io::ErrorKind::Other, other.to_string()),
        }
    }
}
