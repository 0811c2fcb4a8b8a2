//! Typed values produced by the structure codec.

use std::fmt;

use serde::Serialize;

/// An address-sized field: a foreign key into the document's address index.
///
/// Resolution is always an explicit lookup (`Document::resolve`), which keeps
/// decoding shallow and lets cyclic structures decode without recursion.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Pointer {
    address: u64,
}

impl Pointer {
    pub const NULL: Pointer = Pointer { address: 0 };

    pub fn new(address: u64) -> Self {
        Self { address }
    }

    pub fn address(self) -> u64 {
        self.address
    }

    pub fn is_null(self) -> bool {
        self.address == 0
    }

    /// Non-null. Says nothing about whether the address resolves.
    pub fn is_valid(self) -> bool {
        !self.is_null()
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({:#x})", self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Pointer(Pointer),
    Struct(StructValue),
    /// Fixed-size array (multi-dimensional arrays are flattened).
    Array(Vec<Value>),
    /// Byte arrays and primitives of unknown type, kept verbatim.
    Bytes(Vec<u8>),
}

impl Value {
    /// Short kind label used in layout diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::I8(_)      => "i8",
            Value::U8(_)      => "u8",
            Value::I16(_)     => "i16",
            Value::U16(_)     => "u16",
            Value::I32(_)     => "i32",
            Value::U32(_)     => "u32",
            Value::I64(_)     => "i64",
            Value::U64(_)     => "u64",
            Value::F32(_)     => "f32",
            Value::F64(_)     => "f64",
            Value::Pointer(_) => "pointer",
            Value::Struct(_)  => "struct",
            Value::Array(_)   => "array",
            Value::Bytes(_)   => "bytes",
        }
    }

    /// Any integer variant, widened.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v)  => Some(v.into()),
            Value::U8(v)  => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::I64(v) => Some(v),
            Value::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<Pointer> {
        match *self {
            Value::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name:  String,
    pub value: Value,
}

/// One decoded structure instance. Fields keep catalog order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructValue {
    pub type_name: String,
    pub fields:    Vec<Field>,
}

impl StructValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), fields: Vec::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push(Field { name: name.into(), value });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.iter_mut().find(|f| f.name == name).map(|f| &mut f.value)
    }

    /// Overwrite an existing field. Returns the old value, or `None` if the
    /// field does not exist (nothing is added).
    pub fn set(&mut self, name: &str, value: Value) -> Option<Value> {
        self.get_mut(name).map(|slot| std::mem::replace(slot, value))
    }

    pub fn pointer(&self, name: &str) -> Option<Pointer> {
        self.get(name).and_then(Value::as_pointer)
    }

    /// A byte-array field read as a nul-terminated string.
    pub fn string(&self, name: &str) -> Option<String> {
        let bytes = self.get(name)?.as_bytes()?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_validity_is_nonzero() {
        assert!(Pointer::NULL.is_null());
        assert!(!Pointer::NULL.is_valid());
        assert!(Pointer::new(0xdead_beef).is_valid());
        assert_eq!(format!("{:?}", Pointer::new(16)), "Pointer(0x10)");
    }

    #[test]
    fn struct_accessors() {
        let mut s = StructValue::new("ID")
            .with_field("next", Value::Pointer(Pointer::new(0x40)))
            .with_field("name", Value::Bytes(b"OBCube\0\0\0".to_vec()))
            .with_field("flag", Value::I16(3));

        assert_eq!(s.pointer("next"), Some(Pointer::new(0x40)));
        assert_eq!(s.string("name").as_deref(), Some("OBCube"));
        assert_eq!(s.get("flag").and_then(Value::as_i64), Some(3));

        assert_eq!(s.set("flag", Value::I16(9)), Some(Value::I16(3)));
        assert_eq!(s.set("missing", Value::I16(1)), None);
        assert_eq!(s.fields.len(), 3);
    }
}
