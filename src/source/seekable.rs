//! Random access over zstd's seekable format.
//!
//! A seekable stream is a run of independent zstd frames followed by a
//! skippable frame holding the seek table:
//!
//! ```text
//! skippable header   u32 magic 0x184D2A5E, u32 frame size
//! entries            per frame: u32 compressed, u32 decompressed [, u32 checksum]
//! footer             u32 frame count, u8 descriptor, u32 magic 0x8F92EAB1
//! ```
//!
//! All fields are little-endian. Bit 7 of the descriptor says whether entries
//! carry a checksum; bits 2..=6 are reserved and must be zero.
//!
//! Reads decompress only the frame covering the current position. The most
//! recently decompressed frame is kept, so sequential reads through a frame
//! cost one decompression.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace};
use zstd::bulk::Decompressor;

use crate::error::{Error, Result};

pub const SKIPPABLE_MAGIC:  u32   = 0x184D_2A5E;
pub const SEEKABLE_MAGIC:   u32   = 0x8F92_EAB1;
pub const FOOTER_SIZE:      usize = 9;
const SKIPPABLE_HEADER_SIZE: usize = 8;
const CHECKSUM_FLAG:        u8    = 0x80;
const RESERVED_BITS:        u8    = 0x7C;

/// One entry of the seek table with its offsets resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEntry {
    pub compressed_offset:   u64,
    pub compressed_size:     u32,
    pub decompressed_offset: u64,
    pub decompressed_size:   u32,
}

impl FrameEntry {
    fn decompressed_end(&self) -> u64 {
        self.decompressed_offset + u64::from(self.decompressed_size)
    }
}

/// Read the seek table at the end of `src`.
///
/// Returns `Ok(None)` when the stream ends in something other than a seek
/// table footer, i.e. it is an ordinary zstd stream. A footer that is present
/// but inconsistent is a [`Error::Format`].
pub fn read_seek_table<R: Read + Seek>(src: &mut R) -> Result<Option<Vec<FrameEntry>>> {
    let end = src.seek(SeekFrom::End(0))?;
    if end < (FOOTER_SIZE + SKIPPABLE_HEADER_SIZE) as u64 {
        return Ok(None);
    }

    let mut footer = [0u8; FOOTER_SIZE];
    src.seek(SeekFrom::Start(end - FOOTER_SIZE as u64))?;
    src.read_exact(&mut footer)?;
    if LittleEndian::read_u32(&footer[5..9]) != SEEKABLE_MAGIC {
        return Ok(None);
    }

    let frames     = LittleEndian::read_u32(&footer[0..4]) as u64;
    let descriptor = footer[4];
    if descriptor & RESERVED_BITS != 0 {
        return Err(Error::Format(format!("seek table descriptor {descriptor:#04x} sets reserved bits")));
    }
    let entry_size: u64 = if descriptor & CHECKSUM_FLAG != 0 { 12 } else { 8 };

    let table_len = frames * entry_size + FOOTER_SIZE as u64;
    let table_start = table_len
        .checked_add(SKIPPABLE_HEADER_SIZE as u64)
        .and_then(|n| end.checked_sub(n))
        .ok_or_else(|| Error::Format(format!("seek table of {frames} frames exceeds the stream")))?;

    let mut table = vec![0u8; (table_len as usize) + SKIPPABLE_HEADER_SIZE];
    src.seek(SeekFrom::Start(table_start))?;
    src.read_exact(&mut table)?;

    let magic = LittleEndian::read_u32(&table[0..4]);
    let size  = LittleEndian::read_u32(&table[4..8]);
    if magic != SKIPPABLE_MAGIC || u64::from(size) != table_len {
        return Err(Error::Format(format!(
            "seek table frame header mismatch (magic {magic:#010x}, size {size})"
        )));
    }

    let mut entries = Vec::with_capacity(frames as usize);
    let mut compressed_offset   = 0u64;
    let mut decompressed_offset = 0u64;
    for raw in table[SKIPPABLE_HEADER_SIZE..].chunks_exact(entry_size as usize).take(frames as usize) {
        let entry = FrameEntry {
            compressed_offset,
            compressed_size:   LittleEndian::read_u32(&raw[0..4]),
            decompressed_offset,
            decompressed_size: LittleEndian::read_u32(&raw[4..8]),
        };
        compressed_offset   += u64::from(entry.compressed_size);
        decompressed_offset += u64::from(entry.decompressed_size);
        entries.push(entry);
    }

    if compressed_offset != table_start {
        return Err(Error::Format(format!(
            "seek table covers {compressed_offset} compressed bytes, frames end at {table_start}"
        )));
    }

    debug!(frames, decompressed = decompressed_offset, "seek table");
    Ok(Some(entries))
}

/// `Read + Seek` over the decompressed contents of a seekable zstd stream.
pub struct SeekableZstd<R> {
    inner:        R,
    frames:       Vec<FrameEntry>,
    len:          u64,
    pos:          u64,
    cached:       Option<(usize, Vec<u8>)>,
    decompressor: Decompressor<'static>,
}

impl<R: Read + Seek> SeekableZstd<R> {
    /// Parse the seek table of `inner`. Fails if there is none.
    pub fn new(mut inner: R) -> Result<Self> {
        let frames = read_seek_table(&mut inner)?
            .ok_or_else(|| Error::Format("zstd stream has no seek table".into()))?;
        Self::with_frames(inner, frames)
    }

    pub(crate) fn with_frames(inner: R, frames: Vec<FrameEntry>) -> Result<Self> {
        let len = frames.last().map_or(0, FrameEntry::decompressed_end);
        Ok(Self {
            inner,
            frames,
            len,
            pos: 0,
            cached: None,
            decompressor: Decompressor::new()?,
        })
    }

    /// Total decompressed length.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn frames(&self) -> &[FrameEntry] {
        &self.frames
    }

    /// Release the wrapped stream. The decompression context is freed here.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn frame_at(&self, pos: u64) -> Option<usize> {
        let idx = self.frames.partition_point(|f| f.decompressed_end() <= pos);
        (idx < self.frames.len()).then_some(idx)
    }

    fn load(&mut self, idx: usize) -> io::Result<&[u8]> {
        let hit = matches!(&self.cached, Some((cached, _)) if *cached == idx);
        if !hit {
            let frame = self.frames[idx];
            let mut compressed = vec![0u8; frame.compressed_size as usize];
            self.inner.seek(SeekFrom::Start(frame.compressed_offset))?;
            self.inner.read_exact(&mut compressed)?;

            let data = self
                .decompressor
                .decompress(&compressed, frame.decompressed_size as usize)?;
            if data.len() != frame.decompressed_size as usize {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "frame {idx} decompressed to {} bytes, seek table says {}",
                        data.len(),
                        frame.decompressed_size
                    ),
                ));
            }
            trace!(frame = idx, bytes = data.len(), "decompressed frame");
            self.cached = Some((idx, data));
        }

        match &self.cached {
            Some((_, data)) => Ok(data),
            None => Ok(&[]),
        }
    }
}

impl<R: Read + Seek> Read for SeekableZstd<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(idx) = self.frame_at(self.pos) else {
            return Ok(0);
        };

        let start = (self.pos - self.frames[idx].decompressed_offset) as usize;
        let frame = self.load(idx)?;
        let n = buf.len().min(frame.len() - start);
        buf[..n].copy_from_slice(&frame[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SeekableZstd<R> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let next = match target {
            SeekFrom::Start(n)   => Some(n),
            SeekFrom::End(d)     => self.len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        self.pos = next.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        Ok(self.pos)
    }
}

impl<R> fmt::Debug for SeekableZstd<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeekableZstd")
            .field("frames", &self.frames.len())
            .field("len", &self.len)
            .field("pos", &self.pos)
            .field("cached", &self.cached.as_ref().map(|(i, _)| *i))
            .finish()
    }
}
