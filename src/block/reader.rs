use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, trace, warn};

use super::{Block, BlockHeader, ByteRange};
use crate::address::AddressIndex;
use crate::error::{Anomaly, Error, Result};
use crate::header::{Endian, FileHeader, PointerWidth};

/// Output of one framing pass.
#[derive(Debug, Default)]
pub struct Framed {
    pub blocks:    Vec<Block>,
    pub addresses: AddressIndex,
    pub anomalies: Vec<Anomaly>,
}

/// Reads block headers and skips over bodies without buffering them.
#[derive(Debug, Clone, Copy)]
pub struct BlockReader {
    endian:            Endian,
    width:             PointerWidth,
    strict_end_marker: bool,
}

impl BlockReader {
    pub fn new(header: &FileHeader) -> Self {
        Self {
            endian:            header.endian,
            width:             header.pointer_width,
            strict_end_marker: false,
        }
    }

    /// Reject an end marker with a nonzero declared size instead of
    /// recording an anomaly.
    pub fn strict_end_marker(mut self, strict: bool) -> Self {
        self.strict_end_marker = strict;
        self
    }

    /// Read one block header and seek past its body.
    ///
    /// The sentinel's declared size is ignored: its range is always empty
    /// and nothing after its header is consumed.
    pub fn read_block<S: Read + Seek>(&self, src: &mut S) -> Result<(BlockHeader, ByteRange)> {
        let header = BlockHeader::read(&mut *src, self.endian, self.width)?;
        trace!(
            code = %header.code,
            size = header.size,
            address = format_args!("{:#x}", header.old_address),
            catalog_index = header.catalog_index,
            count = header.count,
            "block header"
        );
        if !header.code.is_known() {
            trace!(code = %header.code, "unrecognised block code, kept verbatim");
        }

        if header.is_end_marker() {
            let offset = src.stream_position()?;
            return Ok((header, ByteRange { offset, len: 0 }));
        }

        let len = u64::from(header.size);
        let end = src.seek(SeekFrom::Current(i64::from(header.size)))?;
        Ok((header, ByteRange { offset: end - len, len }))
    }

    /// Frame every block up to the sentinel, building the address index.
    pub fn frame<S: Read + Seek>(&self, src: &mut S) -> Result<Framed> {
        let mut framed = Framed::default();

        loop {
            let (header, range) = self.read_block(src)?;

            if header.is_end_marker() {
                if header.size != 0 {
                    if self.strict_end_marker {
                        return Err(Error::Format(format!(
                            "end marker declares a {}-byte body",
                            header.size
                        )));
                    }
                    let anomaly = Anomaly::NonConformantEndMarker { declared_size: header.size };
                    warn!("{anomaly}");
                    framed.anomalies.push(anomaly);
                }
                break;
            }

            let position = framed.blocks.len();
            if let Some(prev) = framed.addresses.insert(header.old_address, position) {
                let previous = *framed.blocks[prev].header();
                if previous != header {
                    let anomaly = Anomaly::DuplicateAddress {
                        address: header.old_address,
                        previous,
                        current: header,
                    };
                    warn!("{anomaly}");
                    framed.anomalies.push(anomaly);
                }
            }
            framed.blocks.push(Block::framed(header, range));
        }

        debug!(
            blocks = framed.blocks.len(),
            addresses = framed.addresses.len(),
            anomalies = framed.anomalies.len(),
            "framing complete"
        );
        Ok(framed)
    }
}
