use crate::codec::{Compressor, Decompressor};
use crate::crypto::Crypter;
use crate::pipe::{PipeReader, PipeWriter, pipe};
use crate::stream::{NopCloser, SharedReader};
use crate::{Error, Result};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Streams `source` through the optional compressor and then the optional encryptor.
///
/// The transforms run on a dedicated producer thread that feeds a bounded pipe; the returned
/// reader is the consumer end, so the stored bytes are `encrypt(compress(source))`. A failure
/// anywhere in the producer aborts the pipe and is returned from the consumer's next read.
pub fn compress_and_encrypt(
    source: Box<dyn Read + Send>,
    compressor: Option<Arc<dyn Compressor>>,
    crypter: Option<Arc<dyn Crypter>>,
) -> Result<PipeReader> {
    let (writer, reader) = pipe();

    thread::Builder::new()
        .name("stowage-pipeline".to_string())
        .spawn(move || run_producer(source, compressor, crypter, writer))
        .map_err(|e| Error::Task(format!("failed to spawn pipeline producer: {e}")))?;

    Ok(reader)
}

fn run_producer(
    source: Box<dyn Read + Send>,
    compressor: Option<Arc<dyn Compressor>>,
    crypter: Option<Arc<dyn Crypter>>,
    mut writer: PipeWriter,
) {
    match encrypt_layer(source, compressor.as_deref(), crypter.as_deref(), &mut writer) {
        Ok(bytes) => {
            debug!(bytes, "Pipeline producer finished");
        }
        Err(e) => {
            warn!(error = %e, "Pipeline producer aborted");
            writer.close_with_error(e.into_io());
        }
    }
}

// Layers are built outermost first and finished innermost first: the compressor must
// emit its trailer before the encryptor seals its final chunk.
fn encrypt_layer(
    source: Box<dyn Read + Send>,
    compressor: Option<&dyn Compressor>,
    crypter: Option<&dyn Crypter>,
    out: &mut (dyn Write + Send),
) -> Result<u64> {
    match crypter {
        Some(crypter) => {
            let mut encryptor = crypter.encrypt(out)?;
            let copied = compress_layer(source, compressor, &mut encryptor)?;
            encryptor.finish()?;
            Ok(copied)
        }
        None => compress_layer(source, compressor, out),
    }
}

fn compress_layer(
    mut source: Box<dyn Read + Send>,
    compressor: Option<&dyn Compressor>,
    dst: &mut (dyn Write + Send),
) -> Result<u64> {
    match compressor {
        Some(compressor) => {
            let mut writer = compressor.new_writer(dst)?;
            let copied = io::copy(&mut source, &mut writer)?;
            writer.flush()?;
            writer.finish()?;
            Ok(copied)
        }
        None => Ok(io::copy(&mut source, dst)?),
    }
}

/// Reverses [`compress_and_encrypt`]: decrypts first, then decompresses.
///
/// With no transform configured the source handle itself is returned, so closing the
/// result closes the source.
pub fn decrypt_and_decompress(
    source: SharedReader,
    crypter: Option<&dyn Crypter>,
    decompressor: Option<&dyn Decompressor>,
) -> Result<SharedReader> {
    if crypter.is_none() && decompressor.is_none() {
        return Ok(source);
    }

    let mut reader: Box<dyn Read + Send> = Box::new(source);
    if let Some(crypter) = crypter {
        reader = crypter.decrypt(reader)?;
    }

    let decoded = match decompressor {
        Some(decompressor) => decompressor.decompress(reader)?,
        None => Box::new(NopCloser::new(reader)),
    };
    Ok(SharedReader::new(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{GzipCompressor, ZstdCompressor, decompressor_for};
    use crate::crypto::{ChunkedGcmCrypter, HEADER_MAGIC, KdfParams};
    use crate::stream::{Close, StreamWriter};
    use std::io::Cursor;

    fn crypter() -> Arc<dyn Crypter> {
        Arc::new(ChunkedGcmCrypter::with_kdf_params(
            "pipeline-pw",
            KdfParams {
                memory: 1024,
                iterations: 1,
                parallelism: 1,
            },
        ))
    }

    fn encode(
        data: &[u8],
        compressor: Option<Arc<dyn Compressor>>,
        crypter: Option<Arc<dyn Crypter>>,
    ) -> Vec<u8> {
        let mut reader =
            compress_and_encrypt(Box::new(Cursor::new(data.to_vec())), compressor, crypter).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    fn decode(
        data: Vec<u8>,
        compressor: Option<Arc<dyn Compressor>>,
        crypter: Option<Arc<dyn Crypter>>,
    ) -> Vec<u8> {
        let decompressor = compressor.as_deref().and_then(|c| decompressor_for(c));
        let mut reader = decrypt_and_decompress(
            SharedReader::from_reader(Cursor::new(data)),
            crypter.as_deref(),
            decompressor.as_deref(),
        )
        .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        reader.close().unwrap();
        out
    }

    #[test]
    fn test_passthrough_without_transforms() {
        let data = b"untouched bytes".to_vec();
        let encoded = encode(&data, None, None);
        assert_eq!(encoded, data);
        assert_eq!(decode(encoded, None, None), data);
    }

    #[test]
    fn test_compression_is_inner_encryption_outer() {
        let data = b"layered layered layered layered".repeat(100);
        let gzip: Arc<dyn Compressor> = Arc::new(GzipCompressor);
        let encoded = encode(&data, Some(gzip.clone()), Some(crypter()));

        assert_eq!(&encoded[..HEADER_MAGIC.len()], HEADER_MAGIC);
        assert!(encoded.len() < data.len());

        // Decrypting alone must yield a gzip stream.
        let mut plain = Vec::new();
        crypter()
            .decrypt(Box::new(Cursor::new(encoded.clone())))
            .unwrap()
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(&plain[..2], &[0x1f, 0x8b]);

        assert_eq!(decode(encoded, Some(gzip), Some(crypter())), data);
    }

    #[test]
    fn test_every_combination_roundtrips() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 13) as u8).collect();
        let compressors: [Option<Arc<dyn Compressor>>; 3] =
            [None, Some(Arc::new(GzipCompressor)), Some(Arc::new(ZstdCompressor))];

        for compressor in compressors {
            for crypter in [None, Some(crypter())] {
                let encoded = encode(&data, compressor.clone(), crypter.clone());
                assert_eq!(decode(encoded, compressor.clone(), crypter.clone()), data);
            }
        }
    }

    #[test]
    fn test_empty_source() {
        let gzip: Arc<dyn Compressor> = Arc::new(GzipCompressor);
        let encoded = encode(b"", Some(gzip.clone()), Some(crypter()));
        assert!(decode(encoded, Some(gzip), Some(crypter())).is_empty());
    }

    struct FailingSource;

    impl Read for FailingSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "source went away"))
        }
    }

    #[test]
    fn test_source_error_reaches_consumer() {
        let mut reader = compress_and_encrypt(Box::new(FailingSource), None, Some(crypter())).unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    struct BrokenCompressor;

    impl Compressor for BrokenCompressor {
        fn new_writer<'a>(
            &self,
            _sink: &'a mut (dyn Write + Send),
        ) -> Result<Box<dyn StreamWriter + 'a>> {
            Err(Error::Other("compressor unavailable".to_string()))
        }

        fn file_extension(&self) -> &'static str {
            ".broken"
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[test]
    fn test_construction_error_reaches_consumer() {
        let mut reader = compress_and_encrypt(
            Box::new(Cursor::new(b"data".to_vec())),
            Some(Arc::new(BrokenCompressor)),
            None,
        )
        .unwrap();
        let mut out = Vec::new();
        let err = Error::from(reader.read_to_end(&mut out).unwrap_err());
        assert!(matches!(err, Error::Other(msg) if msg == "compressor unavailable"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_passthrough_returns_same_handle() {
        let source = SharedReader::from_reader(Cursor::new(b"x".to_vec()));
        let decoded = decrypt_and_decompress(source.clone(), None, None).unwrap();
        assert!(decoded.same_as(&source));
    }
}
