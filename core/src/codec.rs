use crate::stream::{NopCloser, ObjectReader, StreamWriter};
use crate::{Error, Result};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};

pub const GZIP_FILE_EXT: &str = ".gz";
pub const ZSTD_FILE_EXT: &str = ".zst";

pub trait Compressor: Send + Sync {
    fn new_writer<'a>(&self, sink: &'a mut (dyn Write + Send)) -> Result<Box<dyn StreamWriter + 'a>>;

    fn file_extension(&self) -> &'static str;

    fn name(&self) -> &'static str;
}

pub trait Decompressor: Send + Sync {
    fn decompress(&self, source: Box<dyn Read + Send>) -> Result<Box<dyn ObjectReader>>;

    fn file_extension(&self) -> &'static str;
}

/// Resolves the decompressor matching a compressor's file extension.
pub fn decompressor_for(compressor: &dyn Compressor) -> Option<Box<dyn Decompressor>> {
    match compressor.file_extension() {
        GZIP_FILE_EXT => Some(Box::new(GzipDecompressor)),
        ZSTD_FILE_EXT => Some(Box::new(ZstdDecompressor)),
        _ => None,
    }
}

/// Resolves a compressor from its configured name.
pub fn compressor_by_name(name: &str) -> Result<Box<dyn Compressor>> {
    match name {
        "gzip" => Ok(Box::new(GzipCompressor)),
        "zstd" => Ok(Box::new(ZstdCompressor)),
        other => Err(Error::Config(format!("unsupported compressor: {other}"))),
    }
}

// gzip

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn new_writer<'a>(&self, sink: &'a mut (dyn Write + Send)) -> Result<Box<dyn StreamWriter + 'a>> {
        Ok(Box::new(GzipWriter {
            encoder: GzEncoder::new(sink, Compression::default()),
        }))
    }

    fn file_extension(&self) -> &'static str {
        GZIP_FILE_EXT
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

struct GzipWriter<'a> {
    encoder: GzEncoder<&'a mut (dyn Write + Send)>,
}

impl Write for GzipWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl StreamWriter for GzipWriter<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.encoder.finish().map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipDecompressor;

impl Decompressor for GzipDecompressor {
    fn decompress(&self, source: Box<dyn Read + Send>) -> Result<Box<dyn ObjectReader>> {
        Ok(Box::new(NopCloser::new(MultiGzDecoder::new(source))))
    }

    fn file_extension(&self) -> &'static str {
        GZIP_FILE_EXT
    }
}

// zstd

#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn new_writer<'a>(&self, sink: &'a mut (dyn Write + Send)) -> Result<Box<dyn StreamWriter + 'a>> {
        let encoder = zstd::stream::write::Encoder::new(sink, zstd::DEFAULT_COMPRESSION_LEVEL)?;
        Ok(Box::new(ZstdWriter { encoder }))
    }

    fn file_extension(&self) -> &'static str {
        ZSTD_FILE_EXT
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

struct ZstdWriter<'a> {
    encoder: zstd::stream::write::Encoder<'static, &'a mut (dyn Write + Send)>,
}

impl Write for ZstdWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl StreamWriter for ZstdWriter<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.encoder.finish().map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdDecompressor;

impl Decompressor for ZstdDecompressor {
    fn decompress(&self, source: Box<dyn Read + Send>) -> Result<Box<dyn ObjectReader>> {
        let decoder = zstd::stream::read::Decoder::new(source)?;
        Ok(Box::new(NopCloser::new(decoder)))
    }

    fn file_extension(&self) -> &'static str {
        ZSTD_FILE_EXT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Close;

    fn compress(compressor: &dyn Compressor, data: &[u8]) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        {
            let mut writer = compressor.new_writer(&mut out).unwrap();
            writer.write_all(data).unwrap();
            writer.flush().unwrap();
            writer.finish().unwrap();
        }
        out
    }

    fn decompress(compressor: &dyn Compressor, data: Vec<u8>) -> Vec<u8> {
        let decompressor = decompressor_for(compressor).unwrap();
        let mut reader = decompressor.decompress(Box::new(io::Cursor::new(data))).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        reader.close().unwrap();
        out
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data = b"compressible compressible compressible compressible".repeat(64);
        let packed = compress(&GzipCompressor, &data);
        assert!(packed.len() < data.len());
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        assert_eq!(decompress(&GzipCompressor, packed), data);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let data = b"zstandard zstandard zstandard".repeat(128);
        let packed = compress(&ZstdCompressor, &data);
        assert_eq!(&packed[..4], &[0x28, 0xb5, 0x2f, 0xfd]);
        assert_eq!(decompress(&ZstdCompressor, packed), data);
    }

    #[test]
    fn test_empty_input_roundtrip() {
        for compressor in [&GzipCompressor as &dyn Compressor, &ZstdCompressor] {
            let packed = compress(compressor, b"");
            assert!(!packed.is_empty());
            assert!(decompress(compressor, packed).is_empty());
        }
    }

    #[test]
    fn test_decompressor_lookup_by_extension() {
        assert_eq!(decompressor_for(&GzipCompressor).unwrap().file_extension(), ".gz");
        assert_eq!(decompressor_for(&ZstdCompressor).unwrap().file_extension(), ".zst");

        struct Lz4Like;
        impl Compressor for Lz4Like {
            fn new_writer<'a>(
                &self,
                _sink: &'a mut (dyn Write + Send),
            ) -> Result<Box<dyn StreamWriter + 'a>> {
                Err(Error::Other("not implemented".into()))
            }
            fn file_extension(&self) -> &'static str {
                ".lz4"
            }
            fn name(&self) -> &'static str {
                "lz4"
            }
        }
        assert!(decompressor_for(&Lz4Like).is_none());
    }

    #[test]
    fn test_compressor_by_name() {
        assert_eq!(compressor_by_name("gzip").unwrap().file_extension(), ".gz");
        assert_eq!(compressor_by_name("zstd").unwrap().name(), "zstd");
        assert!(matches!(compressor_by_name("brotli"), Err(Error::Config(_))));
    }
}
