//! Builds small but complete documents for integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::cell::Cell;
use std::rc::Rc;

use blendcodec::{
    Block, BlockCode, BlockHeader, Body, Catalog, CatalogBuilder, CatalogLayout, Endian,
    FileHeader, LayoutContext, LayoutStrategy, Pointer, PointerWidth, StructValue, Value,
};

pub const CATALOG_ADDRESS: u64 = 0x1000;

/// Link (0), ID, Material, Object. Object points at Material through a
/// double pointer and at other Objects through `parent`.
pub fn catalog(width: PointerWidth) -> Catalog {
    CatalogBuilder::new(width)
        .primitive("char", 1)
        .primitive("short", 2)
        .primitive("int", 4)
        .primitive("float", 4)
        .structure("Link", &[("Link", "*next"), ("Link", "*prev")])
        .structure(
            "ID",
            &[
                ("void", "*next"),
                ("void", "*prev"),
                ("char", "name[24]"),
                ("int", "us"),
                ("short", "flag"),
                ("short", "_pad"),
            ],
        )
        .structure(
            "Object",
            &[
                ("ID", "id"),
                ("float", "loc[3]"),
                ("int", "lay"),
                ("Object", "*parent"),
                ("Material", "**mat"),
                ("short", "totcol"),
                ("char", "_pad[6]"),
            ],
        )
        .structure(
            "Material",
            &[("ID", "id"), ("float", "r"), ("float", "g"), ("float", "b"), ("float", "alpha")],
        )
        .build()
        .expect("fixture catalog")
}

pub fn id(name: &str) -> Value {
    let mut bytes = name.as_bytes().to_vec();
    bytes.resize(24, 0);
    Value::Struct(
        StructValue::new("ID")
            .with_field("next", Value::Pointer(Pointer::NULL))
            .with_field("prev", Value::Pointer(Pointer::NULL))
            .with_field("name", Value::Bytes(bytes))
            .with_field("us", Value::I32(1))
            .with_field("flag", Value::I16(0))
            .with_field("_pad", Value::I16(0)),
    )
}

pub fn object(name: &str, loc: [f32; 3], parent: u64, mat: u64) -> StructValue {
    StructValue::new("Object")
        .with_field("id", id(name))
        .with_field("loc", Value::Array(loc.iter().map(|&v| Value::F32(v)).collect()))
        .with_field("lay", Value::I32(1))
        .with_field("parent", Value::Pointer(Pointer::new(parent)))
        .with_field("mat", Value::Pointer(Pointer::new(mat)))
        .with_field("totcol", Value::I16(if mat == 0 { 0 } else { 1 }))
        .with_field("_pad", Value::Bytes(vec![0; 6]))
}

pub fn material(name: &str, rgb: [f32; 3]) -> StructValue {
    StructValue::new("Material")
        .with_field("id", id(name))
        .with_field("r", Value::F32(rgb[0]))
        .with_field("g", Value::F32(rgb[1]))
        .with_field("b", Value::F32(rgb[2]))
        .with_field("alpha", Value::F32(1.0))
}

/// Writes a document block by block.
pub struct Fixture {
    pub header:  FileHeader,
    pub catalog: Catalog,
    out:         Vec<u8>,
}

impl Fixture {
    pub fn new(width: PointerWidth, endian: Endian, version: u16) -> Self {
        let header = FileHeader::new(width, endian, version);
        let mut out = Vec::new();
        header.write(&mut out).expect("file header");
        Self { header, catalog: catalog(width), out }
    }

    /// Eight-byte pointers, little-endian, version 400.
    pub fn standard() -> Self {
        Self::new(PointerWidth::Eight, Endian::Little, 400)
    }

    /// Write a block header with exactly `header.size` from `body`.
    pub fn block(mut self, mut header: BlockHeader, body: &[u8]) -> Self {
        header.size = body.len() as u32;
        header
            .write(&mut self.out, self.header.endian, self.header.pointer_width)
            .expect("block header");
        self.out.extend_from_slice(body);
        self
    }

    pub fn raw(self, code: BlockCode, address: u64, body: &[u8]) -> Self {
        self.block(header(code, address, 0, 1), body)
    }

    pub fn catalog_block(self) -> Self {
        let body = self.catalog.to_bytes(self.header.endian);
        self.raw(BlockCode::DNA1, CATALOG_ADDRESS, &body)
    }

    /// Catalog-typed block holding `values` back to back.
    pub fn structs(self, code: BlockCode, address: u64, values: &[StructValue]) -> Self {
        let type_name = values[0].type_name.clone();
        let index = self.catalog.find_struct(&type_name).expect("fixture struct");
        let count = values.len() as u32;
        let body = if count == 1 {
            Body::Struct(values[0].clone())
        } else {
            Body::Sequence(values.to_vec())
        };
        let ctx = LayoutContext {
            catalog:       &self.catalog,
            endian:        self.header.endian,
            pointer_width: self.header.pointer_width,
        };
        let bytes = CatalogLayout.encode(&ctx, &type_name, &body, count).expect("fixture body");
        self.block(header(code, address, index, count), &bytes)
    }

    pub fn finish(self) -> Vec<u8> {
        self.finish_with(BlockHeader::end_marker(), &[])
    }

    /// End with a custom sentinel record, written verbatim.
    pub fn finish_with(mut self, end: BlockHeader, trailing: &[u8]) -> Vec<u8> {
        end.write(&mut self.out, self.header.endian, self.header.pointer_width)
            .expect("end marker");
        self.out.extend_from_slice(trailing);
        self.out
    }
}

pub fn header(code: BlockCode, old_address: u64, catalog_index: u32, count: u32) -> BlockHeader {
    BlockHeader { code, size: 0, old_address, catalog_index, count }
}

/// A scene with one material and two objects, the second parented to the
/// first. Blocks: DNA1, MA, OB, OB, DATA.
pub fn scene(width: PointerWidth, endian: Endian, version: u16) -> Vec<u8> {
    Fixture::new(width, endian, version)
        .catalog_block()
        .structs(BlockCode::MA, 0x2000, &[material("MAred", [1.0, 0.0, 0.0])])
        .structs(BlockCode::OB, 0x3000, &[object("OBCube", [0.0, 1.0, 2.0], 0, 0x5000)])
        .structs(BlockCode::OB, 0x4000, &[object("OBChild", [3.0, 4.0, 5.0], 0x3000, 0)])
        .raw(BlockCode::DATA, 0x5000, &0x2000u64.to_le_bytes())
        .finish()
}

pub fn synthesized(code: BlockCode, address: u64, body: Body) -> Block {
    Block::synthesized(header(code, address, 0, 1), body)
}

/// Counts read calls on the wrapped stream.
pub struct CountingSource<R> {
    inner: R,
    reads: Rc<Cell<usize>>,
}

impl<R> CountingSource<R> {
    pub fn new(inner: R) -> (Self, Rc<Cell<usize>>) {
        let reads = Rc::new(Cell::new(0));
        (Self { inner, reads: Rc::clone(&reads) }, reads)
    }
}

impl CountingSource<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> (Self, Rc<Cell<usize>>) {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read> Read for CountingSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for CountingSource<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Compress `data` as independent zstd frames and append a seek table.
pub fn seekable_zstd(data: &[u8], frame_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut entries = Vec::new();
    for chunk in data.chunks(frame_size) {
        let frame = zstd::bulk::compress(chunk, 3).expect("zstd frame");
        entries.push((frame.len() as u32, chunk.len() as u32));
        out.extend_from_slice(&frame);
    }

    let table_len = entries.len() * 8 + 9;
    out.extend_from_slice(&0x184D_2A5Eu32.to_le_bytes());
    out.extend_from_slice(&(table_len as u32).to_le_bytes());
    for (compressed, decompressed) in &entries {
        out.extend_from_slice(&compressed.to_le_bytes());
        out.extend_from_slice(&decompressed.to_le_bytes());
    }
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.push(0);
    out.extend_from_slice(&0x8F92_EAB1u32.to_le_bytes());
    out
}
