//! Catalog-driven structure layout.
//!
//! [`CatalogLayout`] walks a struct's field list in catalog order and reads
//! each field at its natural width: pointers at the document pointer width,
//! nested structs recursively, primitives by name and catalog size. No
//! padding is inserted; catalogs spell padding out as explicit fields, and a
//! struct must consume exactly the size its type entry declares.

use std::slice;

use crate::block::Body;
use crate::catalog::FieldName;
use crate::error::{mismatch, Error, Result};
use crate::registry::{LayoutContext, LayoutStrategy};
use crate::value::{Field, Pointer, StructValue, Value};

/// Guards against catalogs that nest a struct inside itself by value.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogLayout;

impl LayoutStrategy for CatalogLayout {
    fn name(&self) -> &str {
        "catalog"
    }

    fn decode(&self, ctx: &LayoutContext<'_>, type_name: &str, bytes: &[u8], count: u32) -> Result<Body> {
        let (index, size) = lookup(ctx, type_name)?;
        let expected = size * count as usize;
        if bytes.len() != expected {
            return Err(Error::BodySize {
                type_name: type_name.to_owned(),
                expected,
                actual: bytes.len(),
                count,
                size,
            });
        }

        let mut r = FieldReader { buf: bytes, pos: 0 };
        if count == 1 {
            return decode_struct(ctx, index, &mut r, 0).map(Body::Struct);
        }
        (0..count)
            .map(|_| decode_struct(ctx, index, &mut r, 0))
            .collect::<Result<Vec<_>>>()
            .map(Body::Sequence)
    }

    fn encode(&self, ctx: &LayoutContext<'_>, type_name: &str, body: &Body, count: u32) -> Result<Vec<u8>> {
        let (index, size) = lookup(ctx, type_name)?;
        let values: &[StructValue] = match body {
            Body::Struct(v) if count == 1 => slice::from_ref(v),
            Body::Sequence(vs) if vs.len() == count as usize => vs,
            Body::Struct(_) => {
                return Err(mismatch(type_name, format!("single instance for a count of {count}")))
            }
            Body::Sequence(vs) => {
                return Err(mismatch(type_name, format!("{} instances for a count of {count}", vs.len())))
            }
            Body::Unparsed | Body::Raw(_) | Body::Catalog(_) => {
                return Err(mismatch(type_name, "body is not catalog-typed"))
            }
        };

        let mut out = Vec::with_capacity(size * values.len());
        for value in values {
            encode_struct(ctx, index, value, &mut out, 0)?;
        }
        Ok(out)
    }
}

fn lookup(ctx: &LayoutContext<'_>, type_name: &str) -> Result<(u32, usize)> {
    let index = ctx
        .catalog
        .find_struct(type_name)
        .ok_or_else(|| Error::UnknownStruct(type_name.to_owned()))?;
    let size = ctx
        .catalog
        .struct_size(index)
        .ok_or_else(|| Error::UnknownStruct(type_name.to_owned()))?;
    Ok((index, size))
}

// ── Primitives ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Opaque(usize),
}

impl Primitive {
    /// Integer widths come from the catalog, so `long` maps to whatever the
    /// producer's compiler made it.
    fn classify(name: &str, size: usize) -> Self {
        match (name, size) {
            ("char" | "uchar" | "uint8_t" | "bool", 1) => Primitive::U8,
            ("int8_t", 1)                             => Primitive::I8,
            ("short" | "int16_t", 2)                  => Primitive::I16,
            ("ushort" | "uint16_t", 2)                => Primitive::U16,
            ("int" | "int32_t" | "long", 4)           => Primitive::I32,
            ("uint" | "uint32_t" | "ulong", 4)        => Primitive::U32,
            ("long" | "int64_t" | "int64", 8)         => Primitive::I64,
            ("ulong" | "uint64_t" | "uint64", 8)      => Primitive::U64,
            ("float", 4)                              => Primitive::F32,
            ("double", 8)                             => Primitive::F64,
            (_, n)                                    => Primitive::Opaque(n),
        }
    }

    fn of(ctx: &LayoutContext<'_>, type_index: u16) -> Self {
        let ty = ctx.catalog.type_def(type_index);
        Self::classify(&ty.name, usize::from(ty.size))
    }
}

/// Arrays of single-byte chars are kept as one byte string.
fn is_byte_array(ctx: &LayoutContext<'_>, type_index: u16, name: &FieldName) -> bool {
    name.is_array()
        && !name.is_pointer()
        && ctx.catalog.struct_for_type(type_index).is_none()
        && Primitive::of(ctx, type_index) == Primitive::U8
}

/// Fails a field that cannot be laid out, or whose elements cannot fit in
/// the `remaining` bytes of its struct, before any element is read.
fn check_span(
    ctx:        &LayoutContext<'_>,
    owner:      &str,
    type_index: u16,
    name:       &FieldName,
    remaining:  usize,
) -> Result<()> {
    if name.opaque {
        return Err(mismatch(owner, format!("field {:?} has an unreadable declarator", name.raw)));
    }
    let unit = if name.is_pointer() {
        ctx.pointer_width.bytes()
    } else {
        usize::from(ctx.catalog.type_def(type_index).size)
    };
    let count = name.element_count();
    // Zero-sized elements take no bytes, so their count is bounded separately.
    let fits = unit
        .checked_mul(count)
        .is_some_and(|span| span <= remaining && (unit > 0 || count <= remaining.max(1)));
    if !fits {
        return Err(mismatch(
            owner,
            format!("{} needs {count} x {unit} bytes, {remaining} remain", name.raw),
        ));
    }
    Ok(())
}

// ── Decode ───────────────────────────────────────────────────────────────────

struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len()).ok_or_else(|| {
            Error::MalformedCatalog(format!("layout reads past end of body at offset {}", self.pos))
        })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }
}

fn decode_struct(
    ctx:   &LayoutContext<'_>,
    index: u32,
    r:     &mut FieldReader<'_>,
    depth: usize,
) -> Result<StructValue> {
    let catalog = ctx.catalog;
    let (def, type_name, size) = match (
        catalog.get_struct(index),
        catalog.struct_name(index),
        catalog.struct_size(index),
    ) {
        (Some(d), Some(n), Some(s)) => (d, n, s),
        _ => return Err(Error::UnknownStruct(format!("catalog index {index}"))),
    };
    if depth > MAX_NESTING {
        return Err(Error::MalformedCatalog(format!("{type_name} nests deeper than {MAX_NESTING}")));
    }

    let start = r.pos;
    let mut value = StructValue { type_name: type_name.to_owned(), fields: Vec::with_capacity(def.fields.len()) };
    for field in &def.fields {
        let name = catalog.field_name(field.name_index);
        check_span(ctx, type_name, field.type_index, name, size.saturating_sub(r.pos - start))?;
        let v = decode_field(ctx, field.type_index, name, r, depth)?;
        value.fields.push(Field { name: name.ident.clone(), value: v });
    }

    let consumed = r.pos - start;
    if consumed != size {
        return Err(mismatch(
            type_name,
            format!("fields span {consumed} bytes, catalog declares {size}"),
        ));
    }
    Ok(value)
}

fn decode_field(
    ctx:        &LayoutContext<'_>,
    type_index: u16,
    name:       &FieldName,
    r:          &mut FieldReader<'_>,
    depth:      usize,
) -> Result<Value> {
    if is_byte_array(ctx, type_index, name) {
        return Ok(Value::Bytes(r.take(name.element_count())?.to_vec()));
    }
    if !name.is_array() {
        return decode_element(ctx, type_index, name, r, depth);
    }
    (0..name.element_count())
        .map(|_| decode_element(ctx, type_index, name, r, depth))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn decode_element(
    ctx:        &LayoutContext<'_>,
    type_index: u16,
    name:       &FieldName,
    r:          &mut FieldReader<'_>,
    depth:      usize,
) -> Result<Value> {
    let e = ctx.endian;

    if name.is_pointer() {
        let width = ctx.pointer_width;
        let raw = r.take(width.bytes())?;
        return Ok(Value::Pointer(Pointer::new(width.read_address(e, raw))));
    }
    if let Some(nested) = ctx.catalog.struct_for_type(type_index) {
        return decode_struct(ctx, nested, r, depth + 1).map(Value::Struct);
    }

    Ok(match Primitive::of(ctx, type_index) {
        Primitive::U8        => Value::U8(r.take(1)?[0]),
        Primitive::I8        => Value::I8(r.take(1)?[0] as i8),
        Primitive::U16       => Value::U16(e.read_u16(r.take(2)?)),
        Primitive::I16       => Value::I16(e.read_i16(r.take(2)?)),
        Primitive::U32       => Value::U32(e.read_u32(r.take(4)?)),
        Primitive::I32       => Value::I32(e.read_i32(r.take(4)?)),
        Primitive::U64       => Value::U64(e.read_u64(r.take(8)?)),
        Primitive::I64       => Value::I64(e.read_i64(r.take(8)?)),
        Primitive::F32       => Value::F32(f32::from_bits(e.read_u32(r.take(4)?))),
        Primitive::F64       => Value::F64(f64::from_bits(e.read_u64(r.take(8)?))),
        Primitive::Opaque(n) => Value::Bytes(r.take(n)?.to_vec()),
    })
}

// ── Encode ───────────────────────────────────────────────────────────────────

fn encode_struct(
    ctx:   &LayoutContext<'_>,
    index: u32,
    value: &StructValue,
    out:   &mut Vec<u8>,
    depth: usize,
) -> Result<()> {
    let catalog = ctx.catalog;
    let (def, type_name, size) = match (
        catalog.get_struct(index),
        catalog.struct_name(index),
        catalog.struct_size(index),
    ) {
        (Some(d), Some(n), Some(s)) => (d, n, s),
        _ => return Err(Error::UnknownStruct(format!("catalog index {index}"))),
    };
    if depth > MAX_NESTING {
        return Err(Error::MalformedCatalog(format!("{type_name} nests deeper than {MAX_NESTING}")));
    }
    if value.type_name != type_name {
        return Err(mismatch(type_name, format!("value is a {}", value.type_name)));
    }
    if value.fields.len() != def.fields.len() {
        return Err(mismatch(
            type_name,
            format!("{} fields, catalog declares {}", value.fields.len(), def.fields.len()),
        ));
    }

    let start = out.len();
    for (field, slot) in def.fields.iter().zip(&value.fields) {
        let name = catalog.field_name(field.name_index);
        if name.opaque {
            return Err(mismatch(type_name, format!("field {:?} has an unreadable declarator", name.raw)));
        }
        if slot.name != name.ident {
            return Err(mismatch(
                type_name,
                format!("field {:?} where {:?} was expected", slot.name, name.ident),
            ));
        }
        encode_field(ctx, field.type_index, name, &slot.value, out, type_name, depth)?;
    }

    let written = out.len() - start;
    if written != size {
        return Err(mismatch(
            type_name,
            format!("fields span {written} bytes, catalog declares {size}"),
        ));
    }
    Ok(())
}

fn encode_field(
    ctx:        &LayoutContext<'_>,
    type_index: u16,
    name:       &FieldName,
    value:      &Value,
    out:        &mut Vec<u8>,
    owner:      &str,
    depth:      usize,
) -> Result<()> {
    if !name.is_array() {
        return encode_element(ctx, type_index, name, value, out, owner, depth);
    }

    let n = name.element_count();
    match value {
        Value::Bytes(bytes) if is_byte_array(ctx, type_index, name) => {
            if bytes.len() != n {
                return Err(mismatch(
                    owner,
                    format!("{} holds {} bytes, expected {n}", name.raw, bytes.len()),
                ));
            }
            out.extend_from_slice(bytes);
            Ok(())
        }
        Value::Array(items) if !is_byte_array(ctx, type_index, name) => {
            if items.len() != n {
                return Err(mismatch(
                    owner,
                    format!("{} holds {} elements, expected {n}", name.raw, items.len()),
                ));
            }
            items
                .iter()
                .try_for_each(|item| encode_element(ctx, type_index, name, item, out, owner, depth))
        }
        other => Err(mismatch(owner, format!("{} cannot hold a {} value", name.raw, other.kind()))),
    }
}

fn encode_element(
    ctx:        &LayoutContext<'_>,
    type_index: u16,
    name:       &FieldName,
    value:      &Value,
    out:        &mut Vec<u8>,
    owner:      &str,
    depth:      usize,
) -> Result<()> {
    let e = ctx.endian;
    let mut buf = [0u8; 8];

    if name.is_pointer() {
        let Value::Pointer(p) = value else {
            return Err(mismatch(owner, format!("{} expects a pointer, got {}", name.raw, value.kind())));
        };
        let width = ctx.pointer_width.bytes();
        ctx.pointer_width.write_address(e, &mut buf[..width], p.address())?;
        out.extend_from_slice(&buf[..width]);
        return Ok(());
    }
    if let Some(nested) = ctx.catalog.struct_for_type(type_index) {
        let Value::Struct(s) = value else {
            return Err(mismatch(owner, format!("{} expects a struct, got {}", name.raw, value.kind())));
        };
        return encode_struct(ctx, nested, s, out, depth + 1);
    }

    let prim = Primitive::of(ctx, type_index);
    let n = match (prim, value) {
        (Primitive::U8, &Value::U8(v))  => { buf[0] = v; 1 }
        (Primitive::I8, &Value::I8(v))  => { buf[0] = v as u8; 1 }
        (Primitive::U16, &Value::U16(v)) => { e.write_u16(&mut buf, v); 2 }
        (Primitive::I16, &Value::I16(v)) => { e.write_i16(&mut buf, v); 2 }
        (Primitive::U32, &Value::U32(v)) => { e.write_u32(&mut buf, v); 4 }
        (Primitive::I32, &Value::I32(v)) => { e.write_i32(&mut buf, v); 4 }
        (Primitive::U64, &Value::U64(v)) => { e.write_u64(&mut buf, v); 8 }
        (Primitive::I64, &Value::I64(v)) => { e.write_i64(&mut buf, v); 8 }
        (Primitive::F32, &Value::F32(v)) => { e.write_u32(&mut buf, v.to_bits()); 4 }
        (Primitive::F64, &Value::F64(v)) => { e.write_u64(&mut buf, v.to_bits()); 8 }
        (Primitive::Opaque(size), Value::Bytes(bytes)) if bytes.len() == size => {
            out.extend_from_slice(bytes);
            return Ok(());
        }
        (prim, other) => {
            return Err(mismatch(
                owner,
                format!("{} expects {prim:?}, got {}", name.raw, other.kind()),
            ))
        }
    };
    out.extend_from_slice(&buf[..n]);
    Ok(())
}
