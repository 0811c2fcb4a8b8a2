//! The decoded container: header, ordered blocks and the address index.
//!
//! Decoding frames every block but reads no bodies. Bodies are pulled from
//! the byte source one at a time by [`Document::decode_block`] and cached on
//! the block, so a document can be opened, inspected and re-encoded while
//! touching only the blocks a caller actually asks for.
//!
//! Catalog-indexed blocks need the catalog first. It is loaded by
//! [`Document::load_catalog`], by decoding the catalog block itself, or by
//! either whole-document decode.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::address::{AddressAllocator, AddressIndex};
use crate::block::{Block, BlockCode, BlockHeader, BlockReader, BlockWriter, Body, ByteRange};
use crate::catalog::Catalog;
use crate::error::{mismatch, Anomaly, Error, Result};
use crate::header::FileHeader;
use crate::options::DecodeOptions;
use crate::registry::{LayoutContext, LayoutStrategy};
use crate::source::{BlendSource, FileSource, ReadAt};
use crate::value::Pointer;

pub struct Document<S> {
    pub(crate) header:         FileHeader,
    pub(crate) blocks:         Vec<Block>,
    pub(crate) addresses:      AddressIndex,
    pub(crate) anomalies:      Vec<Anomaly>,
    pub(crate) catalog:        Option<Arc<Catalog>>,
    pub(crate) strategy:       Arc<dyn LayoutStrategy>,
    pub(crate) allow_trailing: bool,
    allocator:                 AddressAllocator,
    pub(crate) source:         S,
}

impl Document<FileSource> {
    /// Open a file, transparently handling zstd compression.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::decode(BlendSource::open(path)?)
    }
}

impl<S: Read + Seek> Document<S> {
    pub fn decode(source: S) -> Result<Self> {
        Self::decode_with(source, &DecodeOptions::default())
    }

    /// Read the header and frame every block up to the end marker.
    ///
    /// Any header or framing failure aborts the decode. Anomalies found on the
    /// way are logged and kept on the document.
    pub fn decode_with(mut source: S, options: &DecodeOptions) -> Result<Self> {
        source.seek(SeekFrom::Start(0))?;
        let header = FileHeader::read(&mut source)?;
        debug!(
            pointer_width = header.pointer_width.bytes(),
            endian = ?header.endian,
            version = header.version,
            "file header"
        );

        let mut anomalies = Vec::new();
        let (strategy, anomaly) = options.registry.resolve(header.version);
        if let Some(anomaly) = anomaly {
            warn!("{anomaly}");
            anomalies.push(anomaly);
        }

        let framed = BlockReader::new(&header)
            .strict_end_marker(options.strict_end_marker)
            .frame(&mut source)?;
        anomalies.extend(framed.anomalies);

        Ok(Self {
            header,
            blocks:    framed.blocks,
            addresses: framed.addresses,
            anomalies,
            catalog:   None,
            strategy,
            allow_trailing: options.allow_trailing_bytes,
            allocator: AddressAllocator::new(header.pointer_width),
            source,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn block_mut(&mut self, index: usize) -> Option<&mut Block> {
        self.blocks.get_mut(index)
    }

    pub fn addresses(&self) -> &AddressIndex {
        &self.addresses
    }

    /// Non-fatal findings, in the order they were made.
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// The catalog, once loaded.
    pub fn catalog(&self) -> Option<&Arc<Catalog>> {
        self.catalog.as_ref()
    }

    /// Layout strategy selected for this document's format version.
    pub fn strategy(&self) -> &dyn LayoutStrategy {
        &*self.strategy
    }

    /// Release the byte source.
    pub fn into_source(self) -> S {
        self.source
    }

    // ── Catalog ──────────────────────────────────────────────────────────────

    /// Parse the first catalog block and make it available for
    /// catalog-indexed decoding. Later calls return the cached catalog.
    pub fn load_catalog(&mut self) -> Result<Arc<Catalog>> {
        if let Some(catalog) = &self.catalog {
            return Ok(Arc::clone(catalog));
        }

        let positions: Vec<usize> = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.code() == BlockCode::DNA1)
            .map(|(i, _)| i)
            .collect();
        let (&first, extra) = positions
            .split_first()
            .ok_or(Error::MissingCatalog(BlockCode::DNA1))?;
        for &block_index in extra {
            let anomaly = Anomaly::ExtraCatalog { block_index };
            warn!("{anomaly}");
            self.anomalies.push(anomaly);
        }

        let catalog = match self.blocks[first].body() {
            Body::Catalog(catalog) => Arc::clone(catalog),
            Body::Raw(bytes) => Arc::new(Catalog::parse(bytes, self.header.endian)?),
            _ => {
                let range = self.blocks[first].range().ok_or(Error::NoSuchBlock(first))?;
                let bytes = read_range(&mut self.source, range)?;
                let catalog = Arc::new(Catalog::parse(&bytes, self.header.endian)?);
                self.blocks[first].set_decoded(Body::Catalog(Arc::clone(&catalog)));
                catalog
            }
        };

        debug!(
            block = first,
            names = catalog.names().len(),
            types = catalog.types().len(),
            structs = catalog.structs().len(),
            "catalog loaded"
        );
        self.catalog = Some(Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Load the catalog if the document has one and it is not loaded yet.
    /// A catalog that fails to parse is left for its block's own decode to
    /// report.
    pub(crate) fn prime_catalog(&mut self) {
        if self.catalog.is_some() || !self.blocks.iter().any(|b| b.code() == BlockCode::DNA1) {
            return;
        }
        if let Err(e) = self.load_catalog() {
            debug!("catalog not loaded: {e}");
        }
    }

    /// Catalog index of the struct named `type_name`.
    pub fn find_struct(&self, type_name: &str) -> Result<u32> {
        let catalog = self.catalog.as_ref().ok_or(Error::CatalogNotReady)?;
        catalog
            .find_struct(type_name)
            .ok_or_else(|| Error::UnknownStruct(type_name.to_owned()))
    }

    // ── Bodies ───────────────────────────────────────────────────────────────

    /// Decode block `index`, reading its body from the source on first use.
    /// A block that already holds a body is returned as is.
    pub fn decode_block(&mut self, index: usize) -> Result<&Body> {
        let block = self.blocks.get(index).ok_or(Error::NoSuchBlock(index))?;
        if !block.is_decoded() {
            let header = *block.header();
            let range = block.range().ok_or(Error::NoSuchBlock(index))?;
            let bytes = read_range(&mut self.source, range)?;
            let body = decode_body(
                &self.header,
                &header,
                bytes,
                self.catalog.as_deref(),
                &*self.strategy,
                self.allow_trailing,
            )?;
            let is_catalog = matches!(body, Body::Catalog(_));
            self.blocks[index].set_decoded(body);
            if is_catalog {
                self.prime_catalog();
            }
        }
        Ok(self.blocks[index].body())
    }

    /// Decode every block. Failures are per block and do not stop the rest.
    ///
    /// The catalog is loaded first, so typed blocks framed before it decode
    /// too.
    pub fn decode_all(&mut self) -> Vec<(usize, Error)> {
        self.prime_catalog();
        let mut failures = Vec::new();
        for index in 0..self.blocks.len() {
            if let Err(e) = self.decode_block(index) {
                warn!(block = index, code = %self.blocks[index].code(), "decode failed: {e}");
                failures.push((index, e));
            }
        }
        failures
    }

    /// Body bytes as they were stored in the source.
    pub fn read_body(&mut self, index: usize) -> Result<Vec<u8>> {
        let block = self.blocks.get(index).ok_or(Error::NoSuchBlock(index))?;
        let range = block.range().ok_or(Error::NoSuchBlock(index))?;
        read_range(&mut self.source, range)
    }

    /// Body bytes as [`encode`](Self::encode) would write them.
    ///
    /// An undecoded body is copied from the source. A decoded one is
    /// serialized from its current value, except an untouched catalog which
    /// is copied so its padding survives.
    pub fn body_bytes(&mut self, index: usize) -> Result<Vec<u8>> {
        let block = self.blocks.get(index).ok_or(Error::NoSuchBlock(index))?;
        let header = *block.header();

        match (block.body(), block.range()) {
            (Body::Unparsed, Some(range)) => read_range(&mut self.source, range),
            (Body::Unparsed, None) => Err(mismatch(&header.code.to_string(), "synthesized block has no body")),
            (Body::Catalog(_), Some(range)) if !block.is_modified() => read_range(&mut self.source, range),
            (Body::Catalog(catalog), _) => Ok(catalog.to_bytes(self.header.endian)),
            (Body::Raw(bytes), _) => Ok(bytes.clone()),
            (body @ (Body::Struct(_) | Body::Sequence(_)), _) => {
                let catalog = self.catalog.as_deref().ok_or(Error::CatalogNotReady)?;
                let type_name = catalog
                    .struct_name(header.catalog_index)
                    .ok_or_else(|| Error::UnknownStruct(format!("catalog index {}", header.catalog_index)))?;
                let ctx = LayoutContext {
                    catalog,
                    endian:        self.header.endian,
                    pointer_width: self.header.pointer_width,
                };
                self.strategy.encode(&ctx, type_name, body, header.count)
            }
        }
    }

    // ── Addresses ────────────────────────────────────────────────────────────

    /// Block a pointer refers to, if its address was declared in this
    /// document. Null never resolves.
    pub fn resolve(&self, pointer: Pointer) -> Option<&Block> {
        self.resolve_index(pointer).and_then(|i| self.blocks.get(i))
    }

    pub fn resolve_index(&self, pointer: Pointer) -> Option<usize> {
        if pointer.is_null() {
            return None;
        }
        self.addresses.get(pointer.address())
    }

    /// Mint an old address no block in this document uses.
    pub fn allocate_address(&mut self) -> Result<u64> {
        self.allocator.allocate(&self.addresses)
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    /// Append `block` and index its old address. Returns its position.
    pub fn append_block(&mut self, block: Block) -> usize {
        let position = self.blocks.len();
        self.blocks.push(block);
        self.index_address(position);
        position
    }

    /// Insert `block` before `position`, shifting later blocks down.
    pub fn insert_block(&mut self, position: usize, block: Block) -> Result<()> {
        if position > self.blocks.len() {
            return Err(Error::NoSuchBlock(position));
        }
        self.addresses.shift_from(position);
        self.blocks.insert(position, block);
        self.index_address(position);
        Ok(())
    }

    /// Append a new block holding `body` under a freshly allocated address.
    ///
    /// Catalog-typed bodies get the catalog index of their type name and a
    /// count matching the number of instances. Returns a pointer to the
    /// new block.
    pub fn add_block(&mut self, code: BlockCode, body: Body) -> Result<Pointer> {
        let (catalog_index, count) = match &body {
            Body::Struct(value) => (self.find_struct(&value.type_name)?, 1),
            Body::Sequence(values) => {
                let first = values
                    .first()
                    .ok_or_else(|| mismatch(&code.to_string(), "empty sequence has no type"))?;
                if let Some(other) = values.iter().find(|v| v.type_name != first.type_name) {
                    return Err(mismatch(&first.type_name, format!("sequence also holds {}", other.type_name)));
                }
                (self.find_struct(&first.type_name)?, values.len() as u32)
            }
            Body::Raw(_) | Body::Catalog(_) => (0, 1),
            Body::Unparsed => return Err(mismatch(&code.to_string(), "cannot add an unparsed body")),
        };

        let address = self.allocate_address()?;
        let header = BlockHeader { code, size: 0, old_address: address, catalog_index, count };
        let position = self.append_block(Block::synthesized(header, body));
        debug!(block = position, code = %code, address = format_args!("{address:#x}"), "block added");
        Ok(Pointer::new(address))
    }

    fn index_address(&mut self, position: usize) {
        let current = *self.blocks[position].header();
        if let Some(prev) = self.addresses.insert(current.old_address, position) {
            let previous = *self.blocks[prev].header();
            if previous != current {
                let anomaly = Anomaly::DuplicateAddress { address: current.old_address, previous, current };
                warn!("{anomaly}");
                self.anomalies.push(anomaly);
            }
        }
    }

    // ── Encode ───────────────────────────────────────────────────────────────

    /// Write header, every block in order, then the end marker.
    pub fn encode<W: Write>(&mut self, mut dst: W) -> Result<()> {
        self.header.write(&mut dst)?;
        let writer = BlockWriter::new(&self.header);
        for index in 0..self.blocks.len() {
            let bytes = self.body_bytes(index)?;
            writer.write_block(&mut dst, self.blocks[index].header(), &bytes)?;
        }
        writer.write_end(&mut dst)?;
        debug!(blocks = self.blocks.len(), "document encoded");
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }
}

pub(crate) fn read_range<S: Read + Seek + ?Sized>(source: &mut S, range: ByteRange) -> Result<Vec<u8>> {
    let len = usize::try_from(range.len)
        .map_err(|_| Error::Format(format!("body of {} bytes does not fit in memory", range.len)))?;
    let mut buf = vec![0u8; len];
    source.read_exact_at(range.offset, &mut buf)?;
    Ok(buf)
}

/// Decode one body from its bytes. Pure; shared by sequential and parallel
/// decoding.
pub(crate) fn decode_body(
    file:           &FileHeader,
    header:         &BlockHeader,
    mut bytes:      Vec<u8>,
    catalog:        Option<&Catalog>,
    strategy:       &dyn LayoutStrategy,
    allow_trailing: bool,
) -> Result<Body> {
    if header.catalog_index == 0 {
        return match header.code {
            BlockCode::DATA | BlockCode::REND | BlockCode::TEST => Ok(Body::Raw(bytes)),
            BlockCode::DNA1 => Ok(Body::Catalog(Arc::new(Catalog::parse(&bytes, file.endian)?))),
            other => Err(Error::UnsupportedBlockCode(other)),
        };
    }

    let catalog = catalog.ok_or(Error::CatalogNotReady)?;
    let type_name = catalog
        .struct_name(header.catalog_index)
        .ok_or_else(|| Error::UnknownStruct(format!("catalog index {}", header.catalog_index)))?;
    if allow_trailing {
        let expected = catalog
            .struct_size(header.catalog_index)
            .and_then(|size| size.checked_mul(header.count as usize));
        if let Some(expected) = expected.filter(|&e| bytes.len() > e) {
            warn!(
                code = %header.code,
                address = format_args!("{:#x}", header.old_address),
                unread = bytes.len() - expected,
                "ignoring trailing body bytes"
            );
            bytes.truncate(expected);
        }
    }
    let ctx = LayoutContext { catalog, endian: file.endian, pointer_width: file.pointer_width };
    strategy.decode(&ctx, type_name, &bytes, header.count)
}
