use std::io::{Read, Write};

use serde::Serialize;

use super::BlockCode;
use crate::error::Result;
use crate::header::{Endian, PointerWidth};

/// Header bytes excluding the address field.
pub const HEADER_SIZE_WITHOUT_ADDRESS: usize = 16;

/// Per-block record header.
///
/// ```text
///   0-3   block code      ("DATA")
///   4-7   body size       (u32)
///   8-    old address     (u32 or u64, per pointer width)
///  +0-3   catalog index   (u32)
///  +4-7   repeat count    (u32)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    pub code:          BlockCode,
    pub size:          u32,
    /// Address the block occupied in the producing process. An opaque key,
    /// never dereferenced.
    pub old_address:   u64,
    /// Index into the catalog's struct table; 0 dispatches on `code`.
    pub catalog_index: u32,
    pub count:         u32,
}

impl BlockHeader {
    /// The sentinel record written after the last block.
    pub fn end_marker() -> Self {
        Self {
            code:          BlockCode::ENDB,
            size:          0,
            old_address:   0,
            catalog_index: 0,
            count:         1,
        }
    }

    #[inline]
    pub fn encoded_len(width: PointerWidth) -> usize {
        HEADER_SIZE_WITHOUT_ADDRESS + width.bytes()
    }

    pub fn is_end_marker(&self) -> bool {
        self.code == BlockCode::ENDB
    }

    /// Decode from a buffer of exactly [`BlockHeader::encoded_len`] bytes.
    pub fn decode(buf: &[u8], endian: Endian, width: PointerWidth) -> Self {
        let w = width.bytes();
        Self {
            code:          BlockCode([buf[0], buf[1], buf[2], buf[3]]),
            size:          endian.read_u32(&buf[4..]),
            old_address:   width.read_address(endian, &buf[8..]),
            catalog_index: endian.read_u32(&buf[8 + w..]),
            count:         endian.read_u32(&buf[12 + w..]),
        }
    }

    pub fn encode(&self, endian: Endian, width: PointerWidth) -> Result<Vec<u8>> {
        let w = width.bytes();
        let mut buf = vec![0u8; Self::encoded_len(width)];
        buf[0..4].copy_from_slice(self.code.as_bytes());
        endian.write_u32(&mut buf[4..], self.size);
        width.write_address(endian, &mut buf[8..], self.old_address)?;
        endian.write_u32(&mut buf[8 + w..], self.catalog_index);
        endian.write_u32(&mut buf[12 + w..], self.count);
        Ok(buf)
    }

    pub fn read<R: Read>(mut reader: R, endian: Endian, width: PointerWidth) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE_WITHOUT_ADDRESS + 8];
        let buf = &mut buf[..Self::encoded_len(width)];
        reader.read_exact(buf)?;
        Ok(Self::decode(buf, endian, width))
    }

    pub fn write<W: Write>(&self, mut writer: W, endian: Endian, width: PointerWidth) -> Result<()> {
        writer.write_all(&self.encode(endian, width)?)?;
        Ok(())
    }
}
