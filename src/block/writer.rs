use std::io::Write;

use tracing::debug;

use super::BlockHeader;
use crate::error::{Error, Result};
use crate::header::{Endian, FileHeader, PointerWidth};

/// Emits block records. Body serialization is the caller's job; the writer
/// only guarantees the header's size field matches the bytes written.
#[derive(Debug, Clone, Copy)]
pub struct BlockWriter {
    endian: Endian,
    width:  PointerWidth,
}

impl BlockWriter {
    pub fn new(header: &FileHeader) -> Self {
        Self { endian: header.endian, width: header.pointer_width }
    }

    pub fn write_block<W: Write>(&self, mut dst: W, header: &BlockHeader, body: &[u8]) -> Result<()> {
        let mut header = *header;
        let size = u32::try_from(body.len()).map_err(|_| {
            Error::Format(format!("{} body of {} bytes exceeds u32", header.code, body.len()))
        })?;
        if header.size != size {
            debug!(
                code = %header.code,
                declared = header.size,
                actual = body.len(),
                "block size follows serialized body"
            );
            header.size = size;
        }
        header.write(&mut dst, self.endian, self.width)?;
        dst.write_all(body)?;
        Ok(())
    }

    /// Sentinel record: zero size, count one, no body.
    pub fn write_end<W: Write>(&self, dst: W) -> Result<()> {
        BlockHeader::end_marker().write(dst, self.endian, self.width)
    }
}
