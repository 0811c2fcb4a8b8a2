//! The structure catalog carried in the `DNA1` block.
//!
//! The catalog describes every structure layout used by catalog-indexed
//! blocks. It is a self-contained table in the document's byte order:
//!
//! ```text
//! "SDNA"
//! "NAME" u32 n   n nul-terminated field names      pad to 4
//! "TYPE" u32 n   n nul-terminated type names       pad to 4
//! "TLEN" n x u16 byte size of each type            pad to 4
//! "STRC" u32 n   n x { u16 type, u16 nfields, nfields x (u16 type, u16 name) }
//! ```
//!
//! Field names carry their own declarator: `*next` is a pointer, `mat[4][4]`
//! a two-dimensional array, `(*func)()` a function pointer. A declarator
//! that cannot be read is kept opaque: it round-trips, and only the structs
//! that use it fail to lay out.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::header::{Endian, PointerWidth};

const TAG_SDNA: &[u8; 4] = b"SDNA";
const TAG_NAME: &[u8; 4] = b"NAME";
const TAG_TYPE: &[u8; 4] = b"TYPE";
const TAG_TLEN: &[u8; 4] = b"TLEN";
const TAG_STRC: &[u8; 4] = b"STRC";

// ── Table entries ────────────────────────────────────────────────────────────

/// A type name and its byte size (primitive or structure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDef {
    pub name: String,
    pub size: u16,
}

/// A parsed field declarator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldName {
    /// Declarator exactly as stored, e.g. `*vert[2]`.
    pub raw:              String,
    /// Bare identifier, e.g. `vert`.
    pub ident:            String,
    pub pointer_depth:    u8,
    /// Array extents, outermost first.
    pub dims:             Vec<usize>,
    pub function_pointer: bool,
    /// The declarator could not be read; structs using it cannot be laid out.
    pub opaque:           bool,
    #[serde(skip)]
    count:                usize,
}

impl FieldName {
    /// Parse a declarator such as `**mat`, `obmat[4][4]`, `(*func)()` or
    /// `*(*getfn)()`. Extents whose product overflows are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let bad = |why: &str| Error::MalformedCatalog(format!("field name {raw:?}: {why}"));

        let function_pointer = raw.contains("(*");
        let body = raw.trim_start_matches(['(', '*']);
        let pointer_depth = raw[..raw.len() - body.len()].matches('*').count() as u8;

        let end = body.find(['[', ')']).unwrap_or(body.len());
        let ident = &body[..end];
        if ident.is_empty() {
            return Err(bad("missing identifier"));
        }
        if !ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(bad("invalid identifier"));
        }

        let mut dims = Vec::new();
        let mut count = 1usize;
        let mut rest = &body[end..];
        while let Some(open) = rest.strip_prefix('[') {
            let close = open.find(']').ok_or_else(|| bad("unterminated array extent"))?;
            let n = open[..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| bad("non-numeric array extent"))?;
            count = count.checked_mul(n).ok_or_else(|| bad("array extents overflow"))?;
            dims.push(n);
            rest = &open[close + 1..];
        }
        if !function_pointer && !rest.is_empty() {
            return Err(bad("trailing characters"));
        }

        Ok(Self {
            raw: raw.to_owned(),
            ident: ident.to_owned(),
            pointer_depth,
            dims,
            function_pointer,
            opaque: false,
            count,
        })
    }

    /// Keep a declarator [`parse`](Self::parse) rejected, so the rest of the
    /// catalog stays usable. It round-trips verbatim.
    pub fn opaque(raw: &str) -> Self {
        Self {
            raw:              raw.to_owned(),
            ident:            raw.to_owned(),
            pointer_depth:    0,
            dims:             Vec::new(),
            function_pointer: false,
            opaque:           true,
            count:            1,
        }
    }

    pub fn is_pointer(&self) -> bool {
        self.pointer_depth > 0 || self.function_pointer
    }

    pub fn is_array(&self) -> bool {
        !self.dims.is_empty()
    }

    /// Number of elements the field holds (product of extents, 1 for scalars).
    pub fn element_count(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StructField {
    pub type_index: u16,
    pub name_index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructDef {
    pub type_index: u16,
    pub fields:     Vec<StructField>,
}

// ── Catalog ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Catalog {
    names:   Vec<FieldName>,
    types:   Vec<TypeDef>,
    structs: Vec<StructDef>,
    #[serde(skip)]
    struct_of_type: HashMap<u16, usize>,
    #[serde(skip)]
    struct_by_name: HashMap<String, usize>,
}

impl Catalog {
    /// Assemble a catalog from its three tables, validating every
    /// cross-reference. All index lookups after this point are in range.
    pub fn from_tables(
        names:   Vec<FieldName>,
        types:   Vec<TypeDef>,
        structs: Vec<StructDef>,
    ) -> Result<Self> {
        let mut struct_of_type = HashMap::with_capacity(structs.len());
        let mut struct_by_name = HashMap::with_capacity(structs.len());

        for (i, def) in structs.iter().enumerate() {
            let ty = types.get(usize::from(def.type_index)).ok_or_else(|| {
                Error::MalformedCatalog(format!("struct {i} has type index {} out of range", def.type_index))
            })?;
            for field in &def.fields {
                if usize::from(field.type_index) >= types.len() {
                    return Err(Error::MalformedCatalog(format!(
                        "field of {} has type index {} out of range",
                        ty.name, field.type_index
                    )));
                }
                if usize::from(field.name_index) >= names.len() {
                    return Err(Error::MalformedCatalog(format!(
                        "field of {} has name index {} out of range",
                        ty.name, field.name_index
                    )));
                }
            }
            struct_of_type.entry(def.type_index).or_insert(i);
            struct_by_name.entry(ty.name.clone()).or_insert(i);
        }

        Ok(Self { names, types, structs, struct_of_type, struct_by_name })
    }

    /// Parse the body of a catalog block.
    pub fn parse(body: &[u8], endian: Endian) -> Result<Self> {
        let mut r = TableReader { buf: body, pos: 0, endian };

        r.tag(TAG_SDNA)?;

        r.tag(TAG_NAME)?;
        let n = r.u32()? as usize;
        let mut names = Vec::with_capacity(n.min(body.len()));
        for _ in 0..n {
            let raw = r.cstr()?;
            names.push(FieldName::parse(&raw).unwrap_or_else(|e| {
                warn!("{e}; kept as opaque");
                FieldName::opaque(&raw)
            }));
        }
        r.align();

        r.tag(TAG_TYPE)?;
        let n = r.u32()? as usize;
        let mut type_names = Vec::with_capacity(n.min(body.len()));
        for _ in 0..n {
            type_names.push(r.cstr()?);
        }
        r.align();

        r.tag(TAG_TLEN)?;
        let mut types = Vec::with_capacity(type_names.len());
        for name in type_names {
            types.push(TypeDef { name, size: r.u16()? });
        }
        r.align();

        r.tag(TAG_STRC)?;
        let n = r.u32()? as usize;
        let mut structs = Vec::with_capacity(n.min(body.len()));
        for _ in 0..n {
            let type_index = r.u16()?;
            let field_count = r.u16()?;
            let mut fields = Vec::with_capacity(usize::from(field_count));
            for _ in 0..field_count {
                fields.push(StructField { type_index: r.u16()?, name_index: r.u16()? });
            }
            structs.push(StructDef { type_index, fields });
        }

        let catalog = Self::from_tables(names, types, structs)?;
        debug!(
            names = catalog.names.len(),
            types = catalog.types.len(),
            structs = catalog.structs.len(),
            "parsed structure catalog"
        );
        Ok(catalog)
    }

    /// Serialize in the layout [`Catalog::parse`] reads.
    pub fn to_bytes(&self, endian: Endian) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(TAG_SDNA);

        out.extend_from_slice(TAG_NAME);
        endian.put_u32(&mut out, self.names.len() as u32);
        for name in &self.names {
            out.extend_from_slice(name.raw.as_bytes());
            out.push(0);
        }
        pad4(&mut out);

        out.extend_from_slice(TAG_TYPE);
        endian.put_u32(&mut out, self.types.len() as u32);
        for ty in &self.types {
            out.extend_from_slice(ty.name.as_bytes());
            out.push(0);
        }
        pad4(&mut out);

        out.extend_from_slice(TAG_TLEN);
        for ty in &self.types {
            endian.put_u16(&mut out, ty.size);
        }
        pad4(&mut out);

        out.extend_from_slice(TAG_STRC);
        endian.put_u32(&mut out, self.structs.len() as u32);
        for def in &self.structs {
            endian.put_u16(&mut out, def.type_index);
            endian.put_u16(&mut out, def.fields.len() as u16);
            for field in &def.fields {
                endian.put_u16(&mut out, field.type_index);
                endian.put_u16(&mut out, field.name_index);
            }
        }
        out
    }

    pub fn names(&self) -> &[FieldName] {
        &self.names
    }

    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    pub fn structs(&self) -> &[StructDef] {
        &self.structs
    }

    pub fn get_struct(&self, index: u32) -> Option<&StructDef> {
        self.structs.get(index as usize)
    }

    pub fn struct_name(&self, index: u32) -> Option<&str> {
        self.get_struct(index)
            .map(|def| self.types[usize::from(def.type_index)].name.as_str())
    }

    /// Declared byte size of struct `index`.
    pub fn struct_size(&self, index: u32) -> Option<usize> {
        self.get_struct(index)
            .map(|def| usize::from(self.types[usize::from(def.type_index)].size))
    }

    /// Struct index by type name.
    pub fn find_struct(&self, type_name: &str) -> Option<u32> {
        self.struct_by_name.get(type_name).map(|&i| i as u32)
    }

    /// Struct index describing type `type_index`, if that type is a struct.
    pub fn struct_for_type(&self, type_index: u16) -> Option<u32> {
        self.struct_of_type.get(&type_index).map(|&i| i as u32)
    }

    pub fn type_def(&self, type_index: u16) -> &TypeDef {
        &self.types[usize::from(type_index)]
    }

    pub fn field_name(&self, name_index: u16) -> &FieldName {
        &self.names[usize::from(name_index)]
    }
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

// ── Table reader ─────────────────────────────────────────────────────────────

struct TableReader<'a> {
    buf:    &'a [u8],
    pos:    usize,
    endian: Endian,
}

impl<'a> TableReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len()).ok_or_else(|| {
            Error::MalformedCatalog(format!("truncated at offset {}", self.pos))
        })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn tag(&mut self, expected: &[u8; 4]) -> Result<()> {
        let at = self.pos;
        let got = self.take(4)?;
        if got != expected {
            return Err(Error::MalformedCatalog(format!(
                "expected {:?} at offset {at}, found {:?}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(got)
            )));
        }
        Ok(())
    }

    fn u16(&mut self) -> Result<u16> {
        let endian = self.endian;
        Ok(endian.read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32> {
        let endian = self.endian;
        Ok(endian.read_u32(self.take(4)?))
    }

    fn cstr(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let len = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            Error::MalformedCatalog(format!("unterminated string at offset {}", self.pos))
        })?;
        let s = std::str::from_utf8(&rest[..len])
            .map_err(|_| Error::MalformedCatalog(format!("non-UTF-8 string at offset {}", self.pos)))?
            .to_owned();
        self.pos += len + 1;
        Ok(s)
    }

    fn align(&mut self) {
        self.pos = (self.pos + 3) & !3;
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Assembles a catalog in memory, computing struct sizes from their fields.
///
/// Catalog index 0 on a block header means "no catalog entry", so the
/// first struct defined is only reachable as a nested type.
#[derive(Debug)]
pub struct CatalogBuilder {
    width:   PointerWidth,
    names:   Vec<FieldName>,
    types:   Vec<TypeDef>,
    structs: Vec<StructDef>,
    error:   Option<Error>,
}

impl CatalogBuilder {
    pub fn new(width: PointerWidth) -> Self {
        Self { width, names: Vec::new(), types: Vec::new(), structs: Vec::new(), error: None }
    }

    pub fn primitive(mut self, name: &str, size: u16) -> Self {
        self.type_index(name, size);
        self
    }

    /// Define a struct from `(type, declarator)` pairs. Non-pointer field
    /// types must already be defined; pointer targets may be forward
    /// references.
    pub fn structure(mut self, name: &str, fields: &[(&str, &str)]) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.try_structure(name, fields) {
            Ok(def) => self.structs.push(def),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn build(self) -> Result<Catalog> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Catalog::from_tables(self.names, self.types, self.structs)
    }

    fn try_structure(&mut self, name: &str, fields: &[(&str, &str)]) -> Result<StructDef> {
        let mut size = 0usize;
        let mut defs = Vec::with_capacity(fields.len());
        for &(ty, decl) in fields {
            let field = FieldName::parse(decl)?;
            let type_index = match self.lookup_type(ty) {
                Some(i) => i,
                None if field.is_pointer() => self.type_index(ty, 0),
                None => {
                    return Err(Error::UnknownStruct(format!("{name}.{decl} uses undefined type {ty}")))
                }
            };
            let unit = if field.is_pointer() {
                self.width.bytes()
            } else {
                usize::from(self.types[usize::from(type_index)].size)
            };
            size = unit
                .checked_mul(field.element_count())
                .and_then(|span| size.checked_add(span))
                .ok_or_else(|| Error::MalformedCatalog(format!("{name}.{decl} overflows the struct size")))?;
            let name_index = self.name_index(field);
            defs.push(StructField { type_index, name_index });
        }
        let size = u16::try_from(size)
            .map_err(|_| Error::MalformedCatalog(format!("{name} is {size} bytes, exceeds u16")))?;
        let type_index = self.type_index(name, size);
        self.types[usize::from(type_index)].size = size;
        Ok(StructDef { type_index, fields: defs })
    }

    fn lookup_type(&self, name: &str) -> Option<u16> {
        self.types.iter().position(|t| t.name == name).map(|i| i as u16)
    }

    fn type_index(&mut self, name: &str, size: u16) -> u16 {
        if let Some(i) = self.lookup_type(name) {
            return i;
        }
        self.types.push(TypeDef { name: name.to_owned(), size });
        (self.types.len() - 1) as u16
    }

    fn name_index(&mut self, field: FieldName) -> u16 {
        if let Some(i) = self.names.iter().position(|n| n.raw == field.raw) {
            return i as u16;
        }
        self.names.push(field);
        (self.names.len() - 1) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(width: PointerWidth) -> Catalog {
        CatalogBuilder::new(width)
            .primitive("char", 1)
            .primitive("short", 2)
            .primitive("int", 4)
            .primitive("float", 4)
            .structure("Link", &[("Link", "*next"), ("Link", "*prev")])
            .structure("ID", &[("void", "*next"), ("char", "name[66]"), ("short", "flag")])
            .structure("Object", &[("ID", "id"), ("float", "obmat[4][4]"), ("int", "(*callback)()")])
            .build()
            .unwrap()
    }

    #[test]
    fn field_name_declarators() {
        let f = FieldName::parse("**mat").unwrap();
        assert_eq!((f.ident.as_str(), f.pointer_depth, f.is_array()), ("mat", 2, false));

        let f = FieldName::parse("obmat[4][4]").unwrap();
        assert_eq!(f.dims, vec![4, 4]);
        assert_eq!(f.element_count(), 16);
        assert!(!f.is_pointer());

        let f = FieldName::parse("*vert[2]").unwrap();
        assert_eq!((f.pointer_depth, f.element_count()), (1, 2));

        let f = FieldName::parse("(*func)()").unwrap();
        assert!(f.function_pointer && f.is_pointer());
        assert_eq!(f.ident, "func");

        let f = FieldName::parse("*(*getfn)()").unwrap();
        assert!(f.function_pointer);
        assert_eq!((f.ident.as_str(), f.element_count()), ("getfn", 1));

        let f = FieldName::parse("(*f[2])()").unwrap();
        assert!(f.function_pointer);
        assert_eq!((f.ident.as_str(), f.element_count()), ("f", 2));
    }

    #[test]
    fn field_name_rejects_overflowing_extents() {
        let err = FieldName::parse("a[4294967296][4294967296]").unwrap_err();
        assert!(matches!(err, Error::MalformedCatalog(_)), "{err}");

        let err = CatalogBuilder::new(PointerWidth::Eight)
            .primitive("int", 4)
            .structure("Huge", &[("int", "a[4611686018427387904]")])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MalformedCatalog(_)), "{err}");
    }

    #[test]
    fn unreadable_names_keep_the_catalog() {
        let names = vec![FieldName::opaque("a[4294967296][4294967296]"), FieldName::parse("b").unwrap()];
        let types = vec![TypeDef { name: "int".into(), size: 4 }, TypeDef { name: "S".into(), size: 4 }];
        let structs = vec![StructDef { type_index: 1, fields: vec![StructField { type_index: 0, name_index: 0 }] }];
        let bytes = Catalog::from_tables(names, types, structs).unwrap().to_bytes(Endian::Big);

        let c = Catalog::parse(&bytes, Endian::Big).unwrap();
        assert!(c.names()[0].opaque);
        assert!(!c.names()[1].opaque);
        assert_eq!(c.to_bytes(Endian::Big), bytes);
    }

    #[test]
    fn field_name_rejects_garbage() {
        assert!(FieldName::parse("").is_err());
        assert!(FieldName::parse("x[a]").is_err());
        assert!(FieldName::parse("x[3").is_err());
        assert!(FieldName::parse("x]").is_err());
    }

    #[test]
    fn builder_computes_sizes() {
        let c = sample(PointerWidth::Eight);
        let id = c.find_struct("ID").unwrap();
        assert_eq!(c.struct_size(id), Some(8 + 66 + 2));
        let ob = c.find_struct("Object").unwrap();
        assert_eq!(c.struct_size(ob), Some(76 + 64 + 8));

        let c = sample(PointerWidth::Four);
        let ob = c.find_struct("Object").unwrap();
        assert_eq!(c.struct_size(ob), Some(72 + 64 + 4));
    }

    #[test]
    fn parse_inverts_to_bytes() {
        for endian in [Endian::Little, Endian::Big] {
            let c = sample(PointerWidth::Eight);
            let bytes = c.to_bytes(endian);
            assert_eq!(bytes.len() % 4, 0);
            assert_eq!(Catalog::parse(&bytes, endian).unwrap(), c);
        }
    }

    #[test]
    fn lookups() {
        let c = sample(PointerWidth::Eight);
        let id = c.find_struct("ID").unwrap();
        assert_eq!(c.struct_name(id), Some("ID"));
        let ty = c.get_struct(id).unwrap().type_index;
        assert_eq!(c.struct_for_type(ty), Some(id));
        assert_eq!(c.find_struct("Missing"), None);
        assert!(c.get_struct(99).is_none());
    }

    #[test]
    fn rejects_wrong_tag() {
        let mut bytes = sample(PointerWidth::Eight).to_bytes(Endian::Little);
        bytes[0] = b'X';
        assert!(matches!(
            Catalog::parse(&bytes, Endian::Little),
            Err(Error::MalformedCatalog(_))
        ));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = sample(PointerWidth::Eight).to_bytes(Endian::Little);
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(Catalog::parse(cut, Endian::Little), Err(Error::MalformedCatalog(_))));
    }

    #[test]
    fn rejects_dangling_index() {
        let names = vec![FieldName::parse("x").unwrap()];
        let types = vec![TypeDef { name: "S".into(), size: 4 }];
        let structs = vec![StructDef {
            type_index: 0,
            fields: vec![StructField { type_index: 7, name_index: 0 }],
        }];
        assert!(Catalog::from_tables(names, types, structs).is_err());
    }

    #[test]
    fn builder_rejects_undefined_value_type() {
        let err = CatalogBuilder::new(PointerWidth::Eight)
            .structure("Broken", &[("Nope", "field")])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::UnknownStruct(_)));
    }
}
