//! Blocks: the length-prefixed records that make up a document.
//!
//! A framed block records where its body lives in the byte source but does
//! not read it. The body is decoded on demand into a [`Body`] and cached on
//! the block; a block whose body was never decoded is re-emitted from its
//! original byte range.

mod code;
mod header;
mod reader;
mod writer;

use std::sync::Arc;

pub use code::BlockCode;
pub use header::{BlockHeader, HEADER_SIZE_WITHOUT_ADDRESS};
pub use reader::{BlockReader, Framed};
pub use writer::BlockWriter;

use crate::catalog::Catalog;
use crate::value::StructValue;

/// Location of a block body within the byte source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub len:    u64,
}

/// Decoded block body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Not decoded yet; the bytes are still only in the source.
    Unparsed,
    /// Opaque bytes (`DATA`, `REND`, `TEST`).
    Raw(Vec<u8>),
    /// The structure catalog (`DNA1`).
    Catalog(Arc<Catalog>),
    /// A catalog-typed block with a count of one.
    Struct(StructValue),
    /// A catalog-typed block with any other count.
    Sequence(Vec<StructValue>),
}

impl Body {
    pub fn is_parsed(&self) -> bool {
        !matches!(self, Body::Unparsed)
    }

    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Body::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_catalog(&self) -> Option<&Arc<Catalog>> {
        match self {
            Body::Catalog(catalog) => Some(catalog),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Body::Struct(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_struct_mut(&mut self) -> Option<&mut StructValue> {
        match self {
            Body::Struct(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[StructValue]> {
        match self {
            Body::Sequence(values) => Some(values),
            _ => None,
        }
    }

    /// Number of structure instances the body holds, if it is catalog-typed.
    pub fn instance_count(&self) -> Option<usize> {
        match self {
            Body::Struct(_) => Some(1),
            Body::Sequence(values) => Some(values.len()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    header:   BlockHeader,
    range:    Option<ByteRange>,
    body:     Body,
    modified: bool,
}

impl Block {
    pub(crate) fn framed(header: BlockHeader, range: ByteRange) -> Self {
        Self { header, range: Some(range), body: Body::Unparsed, modified: false }
    }

    /// A block that exists only in memory, e.g. a newly packed payload.
    pub fn synthesized(header: BlockHeader, body: Body) -> Self {
        let mut block = Self { header, range: None, body: Body::Unparsed, modified: true };
        block.set_body(body);
        block
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn code(&self) -> BlockCode {
        self.header.code
    }

    pub fn old_address(&self) -> u64 {
        self.header.old_address
    }

    /// Source range of the body; `None` for synthesized blocks.
    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Mutable access to a decoded body. Changes are serialized on encode.
    pub fn body_mut(&mut self) -> &mut Body {
        self.modified = true;
        &mut self.body
    }

    /// Replace the body. Counts and raw sizes in the header follow the new
    /// body; catalog-typed sizes are fixed up when the block is encoded.
    pub fn set_body(&mut self, body: Body) {
        match &body {
            Body::Raw(bytes) => self.header.size = u32::try_from(bytes.len()).unwrap_or(u32::MAX),
            Body::Sequence(values) => self.header.count = values.len() as u32,
            Body::Struct(_) => self.header.count = 1,
            Body::Unparsed | Body::Catalog(_) => {}
        }
        self.body = body;
        self.modified = true;
    }

    pub fn is_decoded(&self) -> bool {
        self.body.is_parsed()
    }

    /// Whether the body was replaced or handed out mutably since framing.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn set_decoded(&mut self, body: Body) {
        self.body = body;
    }
}
