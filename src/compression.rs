//! Container compression: gzip detection and stream wrapping

use crate::error::Result;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as FlateCompression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Leading bytes of a gzip stream using the deflate method
pub const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];

/// Compression methods a container may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Plain tar
    None,
    /// Gzip-compressed tar
    Gzip,
}

impl CompressionMethod {
    /// Classify a container by its leading bytes.
    pub fn sniff(header: &[u8]) -> Self {
        if header.starts_with(&GZIP_MAGIC) {
            CompressionMethod::Gzip
        } else {
            CompressionMethod::None
        }
    }

    /// Classify the container at `path` by its leading bytes, ignoring its name.
    pub fn detect(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut header = [0u8; GZIP_MAGIC.len()];
        let mut filled = 0;
        while filled < header.len() {
            let read = file.read(&mut header[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(Self::sniff(&header[..filled]))
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, CompressionMethod::Gzip)
    }

    /// Wrap a reader positioned at the start of the container.
    pub fn reader<'a, R: Read + 'a>(&self, inner: R) -> Box<dyn Read + 'a> {
        match self {
            CompressionMethod::None => Box::new(inner),
            CompressionMethod::Gzip => Box::new(GzDecoder::new(inner)),
        }
    }
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn fast() -> Self {
        Self(1)
    }

    pub fn best() -> Self {
        Self(9)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

/// Output sink of an archive being written, optionally gzip-compressed.
pub enum ContainerWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(inner: W, method: CompressionMethod, level: CompressionLevel) -> Self {
        match method {
            CompressionMethod::None => ContainerWriter::Plain(inner),
            CompressionMethod::Gzip => ContainerWriter::Gzip(GzEncoder::new(
                inner,
                FlateCompression::new(level.value() as u32),
            )),
        }
    }

    /// Flush any compressor state and hand back the underlying sink.
    pub fn finish(self) -> Result<W> {
        match self {
            ContainerWriter::Plain(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            ContainerWriter::Gzip(encoder) => Ok(encoder.finish()?),
        }
    }
}

impl<W: Write> Write for ContainerWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ContainerWriter::Plain(inner) => inner.write(buf),
            ContainerWriter::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ContainerWriter::Plain(inner) => inner.flush(),
            ContainerWriter::Gzip(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_sniff_magic() {
        assert_eq!(
            CompressionMethod::sniff(&[0x1F, 0x8B, 0x08, 0x00]),
            CompressionMethod::Gzip
        );
        assert_eq!(
            CompressionMethod::sniff(&[0x1F, 0x8B, 0x09]),
            CompressionMethod::None
        );
        assert_eq!(CompressionMethod::sniff(b"man"), CompressionMethod::None);
        assert_eq!(CompressionMethod::sniff(&[0x1F]), CompressionMethod::None);
    }

    #[test]
    fn test_detect_ignores_extension() {
        let temp_dir = TempDir::new().unwrap();

        let disguised = temp_dir.path().join("plain.tar");
        std::fs::write(&disguised, [0x1F, 0x8B, 0x08, 0x00, 0x00]).unwrap();
        assert_eq!(
            CompressionMethod::detect(&disguised).unwrap(),
            CompressionMethod::Gzip
        );

        let named_gz = temp_dir.path().join("image.tar.gz");
        std::fs::write(&named_gz, b"not gzip at all").unwrap();
        assert_eq!(
            CompressionMethod::detect(&named_gz).unwrap(),
            CompressionMethod::None
        );

        let empty = temp_dir.path().join("empty.gmh");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(
            CompressionMethod::detect(&empty).unwrap(),
            CompressionMethod::None
        );
    }

    #[test]
    fn test_gzip_writer_and_reader() {
        let data = b"Hello, world! ".repeat(100);
        let mut writer = ContainerWriter::new(
            Vec::new(),
            CompressionMethod::Gzip,
            CompressionLevel::default(),
        );
        writer.write_all(&data).unwrap();
        let compressed = writer.finish().unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(CompressionMethod::sniff(&compressed), CompressionMethod::Gzip);

        let mut decompressed = Vec::new();
        CompressionMethod::Gzip
            .reader(Cursor::new(compressed))
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_compression_level_is_clamped() {
        assert_eq!(CompressionLevel::new(42).value(), 9);
        assert_eq!(CompressionLevel::fast().value(), 1);
    }
}
