//! Random-access byte source over a possibly compressed input.
//!
//! [`BlendSource::new`] sniffs the first bytes of the raw stream and picks a
//! strategy:
//!
//! | Leading bytes                      | Strategy                         |
//! |------------------------------------|----------------------------------|
//! | `BLENDER`                          | passthrough                      |
//! | `1f 8b 08` (gzip)                  | [`Error::UnsupportedFormat`]     |
//! | zstd frame or skippable frame      | seekable zstd, or full decode    |
//!
//! A zstd stream that carries a seek table is read frame by frame. One that
//! does not is decompressed into memory up front.

pub mod seekable;

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::header::MAGIC;

pub use seekable::SeekableZstd;

const GZIP_MAGIC:          [u8; 3] = [0x1f, 0x8b, 0x08];
const ZSTD_MAGIC:          u32     = 0xFD2F_B528;
/// Skippable frames occupy `0x184D2A50..=0x184D2A5F`.
const ZSTD_SKIPPABLE_MASKED: u32   = 0x0184_D2A5;

/// Encoding of the raw input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Classify a stream by its leading bytes. `None` if unrecognised.
    pub fn detect(prefix: &[u8]) -> Option<Self> {
        if prefix.starts_with(MAGIC) {
            return Some(Compression::None);
        }
        if prefix.starts_with(&GZIP_MAGIC) {
            return Some(Compression::Gzip);
        }
        if prefix.len() >= 4 {
            let magic = LittleEndian::read_u32(&prefix[0..4]);
            if magic == ZSTD_MAGIC || magic >> 4 == ZSTD_SKIPPABLE_MASKED {
                return Some(Compression::Zstd);
            }
        }
        None
    }
}

/// A seekable view of the decompressed document bytes.
pub enum BlendSource<R> {
    Plain(R),
    Zstd(SeekableZstd<R>),
    /// Zstd without a seek table, fully decompressed.
    Buffered { data: Cursor<Vec<u8>>, inner: R },
}

/// Source type produced by [`BlendSource::open`].
pub type FileSource = BlendSource<BufReader<File>>;

impl BlendSource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening");
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> BlendSource<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let mut prefix = Vec::with_capacity(MAGIC.len());
        (&mut inner).take(MAGIC.len() as u64).read_to_end(&mut prefix)?;
        inner.seek(SeekFrom::Start(0))?;

        match Compression::detect(&prefix) {
            Some(Compression::None) => Ok(BlendSource::Plain(inner)),
            Some(Compression::Gzip) => {
                Err(Error::UnsupportedFormat("gzip-compressed input".into()))
            }
            Some(Compression::Zstd) => match seekable::read_seek_table(&mut inner)? {
                Some(frames) => Ok(BlendSource::Zstd(SeekableZstd::with_frames(inner, frames)?)),
                None => {
                    warn!("zstd input has no seek table, decompressing in memory");
                    inner.seek(SeekFrom::Start(0))?;
                    let data = zstd::decode_all(&mut inner)?;
                    Ok(BlendSource::Buffered { data: Cursor::new(data), inner })
                }
            },
            None => Err(Error::Format(format!(
                "unrecognised stream prefix {}",
                hex::encode(&prefix)
            ))),
        }
    }

    pub fn compression(&self) -> Compression {
        match self {
            BlendSource::Plain(_) => Compression::None,
            BlendSource::Zstd(_) | BlendSource::Buffered { .. } => Compression::Zstd,
        }
    }

    /// Release the underlying stream. Consuming `self` frees any
    /// decompression state exactly once.
    pub fn into_inner(self) -> R {
        match self {
            BlendSource::Plain(r) => r,
            BlendSource::Zstd(z) => z.into_inner(),
            BlendSource::Buffered { inner, .. } => inner,
        }
    }
}

impl<R: Read + Seek> Read for BlendSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlendSource::Plain(r) => r.read(buf),
            BlendSource::Zstd(z) => z.read(buf),
            BlendSource::Buffered { data, .. } => data.read(buf),
        }
    }
}

impl<R: Read + Seek> Seek for BlendSource<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            BlendSource::Plain(r) => r.seek(pos),
            BlendSource::Zstd(z) => z.seek(pos),
            BlendSource::Buffered { data, .. } => data.seek(pos),
        }
    }
}

/// Positioned reads on any seekable stream.
pub trait ReadAt {
    /// Fill `buf` from absolute `offset`, leaving the stream position where
    /// it was.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl<S: Read + Seek + ?Sized> ReadAt for S {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let saved = self.stream_position()?;
        self.seek(SeekFrom::Start(offset))?;
        let read = self.read_exact(buf);
        self.seek(SeekFrom::Start(saved))?;
        read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &[u8] = b"BLENDER-v400ENDB";

    #[test]
    fn detect_prefixes() {
        assert_eq!(Compression::detect(PLAIN), Some(Compression::None));
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 0x08, 0x00]), Some(Compression::Gzip));
        assert_eq!(Compression::detect(&ZSTD_MAGIC.to_le_bytes()), Some(Compression::Zstd));
        assert_eq!(Compression::detect(&0x184D_2A53u32.to_le_bytes()), Some(Compression::Zstd));
        assert_eq!(Compression::detect(&0x184D_2A60u32.to_le_bytes()), None);
        assert_eq!(Compression::detect(b"BLEND"), None);
    }

    #[test]
    fn gzip_is_rejected() {
        let gz = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(BlendSource::new(Cursor::new(gz)), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn unknown_prefix_is_a_format_error() {
        assert!(matches!(BlendSource::new(Cursor::new(b"PK\x03\x04")), Err(Error::Format(_))));
    }

    #[test]
    fn plain_passthrough() {
        let mut src = BlendSource::new(Cursor::new(PLAIN.to_vec())).unwrap();
        assert_eq!(src.compression(), Compression::None);
        let mut out = Vec::new();
        src.read_to_end(&mut out).unwrap();
        assert_eq!(out, PLAIN);
    }

    #[test]
    fn seekable_zstd_is_wrapped() {
        let mut data = PLAIN.to_vec();
        data.extend((0..5000u32).map(|i| i as u8));
        let raw = seekable::tests::seekable(&data, 512, false);

        let mut src = BlendSource::new(Cursor::new(raw)).unwrap();
        assert!(matches!(src, BlendSource::Zstd(_)));

        let mut buf = [0u8; 8];
        src.read_exact_at(4000, &mut buf).unwrap();
        assert_eq!(buf, data[4000..4008]);
        assert_eq!(src.stream_position().unwrap(), 0);
    }

    #[test]
    fn plain_zstd_falls_back_to_memory() {
        let raw = zstd::encode_all(PLAIN, 3).unwrap();
        let mut src = BlendSource::new(Cursor::new(raw)).unwrap();
        assert!(matches!(src, BlendSource::Buffered { .. }));
        assert_eq!(src.compression(), Compression::Zstd);

        let mut out = Vec::new();
        src.read_to_end(&mut out).unwrap();
        assert_eq!(out, PLAIN);
    }
}
