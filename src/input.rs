//! Opening a split of a dump file as a positioned [`ChunkedSource`].

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use bzip2::read::MultiBzDecoder;

use crate::{
    byte_source::{ChunkedSource, SourceConfig},
    split::Split,
};

pub type DumpSource = ChunkedSource<Box<dyn Read + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Plain,
    Bzip2,
    Zstd,
}

impl Codec {
    pub fn from_path(path: &Path) -> Codec {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("bz2") => Codec::Bzip2,
            Some("zst" | "zstd") => Codec::Zstd,
            _ => Codec::Plain,
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Codec::Plain
    }

    fn decode(self, file: File) -> io::Result<Box<dyn Read + Send>> {
        Ok(match self {
            Codec::Plain => Box::new(file),
            // multi-stream: parallel compressors write one bzip2 stream per block
            Codec::Bzip2 => Box::new(MultiBzDecoder::new(BufReader::new(file))),
            Codec::Zstd => Box::new(zstd::stream::read::Decoder::new(file)?),
        })
    }
}

/// Opens `split.path` positioned at `split.start`.
///
/// Uncompressed files are seeked. Compressed files (`split.compressed`) are decoded from the
/// beginning and the first `split.start` logical bytes are discarded. The codec follows the
/// file extension.
#[tracing::instrument(level = "debug", skip(config))]
pub fn open_split(split: &Split, config: SourceConfig) -> io::Result<DumpSource> {
    let codec = Codec::from_path(&split.path);
    if codec.is_compressed() && !split.compressed {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} is {codec:?} compressed and cannot be seeked",
                split.path.display()
            ),
        ));
    }

    let file = File::open(&split.path)?;
    if split.compressed {
        ChunkedSource::skipping(codec.decode(file)?, split.start, config)
    } else {
        Ok(ChunkedSource::seeking(file, split.start, config)?.boxed())
    }
}

/// Length of the logical (decompressed) content of `path`. Compressed files are decoded in
/// full to find out.
pub fn logical_len(path: &Path) -> io::Result<u64> {
    let codec = Codec::from_path(path);
    let file = File::open(path)?;
    if !codec.is_compressed() {
        return Ok(file.metadata()?.len());
    }
    io::copy(&mut codec.decode(file)?, &mut io::sink())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn codec_follows_extension() {
        assert_eq!(Codec::from_path(Path::new("dump.xml")), Codec::Plain);
        assert_eq!(Codec::from_path(Path::new("dump.xml.bz2")), Codec::Bzip2);
        assert_eq!(Codec::from_path(Path::new("dump.xml.zst")), Codec::Zstd);
        assert_eq!(Codec::from_path(Path::new("dump")), Codec::Plain);
    }

    fn read_all(mut source: DumpSource) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let Some(byte) = source.next_byte().unwrap() {
            bytes.push(byte);
        }
        bytes
    }

    #[test]
    fn plain_split_is_seeked() {
        let mut file = tempfile::Builder::new().suffix(".xml").tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();

        let split = Split::new(file.path(), 4, 10, false).unwrap();
        let source = open_split(&split, SourceConfig::default()).unwrap();
        assert_eq!(source.position(), 4);
        assert_eq!(read_all(source), b"456789");
        assert_eq!(logical_len(file.path()).unwrap(), 10);
    }

    #[test]
    fn compressed_split_is_skipped() {
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::fast());
        encoder.write_all(b"0123456789").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut file = tempfile::Builder::new().suffix(".xml.bz2").tempfile().unwrap();
        file.write_all(&compressed).unwrap();
        file.flush().unwrap();

        let split = Split::new(file.path(), 3, 10, true).unwrap();
        let source = open_split(&split, SourceConfig::default()).unwrap();
        assert_eq!(source.position(), 3);
        assert_eq!(read_all(source), b"3456789");
        assert_eq!(logical_len(file.path()).unwrap(), 10);

        let unflagged = Split::new(file.path(), 3, 10, false).unwrap();
        let error = open_split(&unflagged, SourceConfig::default()).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn zstd_split_is_skipped() {
        let compressed = zstd::stream::encode_all(&b"<page>zstd</page>"[..], 3).unwrap();
        let mut file = tempfile::Builder::new().suffix(".xml.zst").tempfile().unwrap();
        file.write_all(&compressed).unwrap();
        file.flush().unwrap();

        let split = Split::new(file.path(), 6, 17, true).unwrap();
        let source = open_split(&split, SourceConfig::default()).unwrap();
        assert_eq!(read_all(source), b"zstd</page>");
    }
}
