//! The 12-byte file preamble.
//!
//! ```text
//! "BLENDER-v401"
//!  0-6   magic ("BLENDER")
//!    7   pointer width ('_' = 4 bytes, '-' = 8 bytes)
//!    8   byte order    ('v' = little-endian, 'V' = big-endian)
//! 9-11   format version, three ASCII digits
//! ```
//!
//! The header fixes pointer width and byte order for every integer and
//! address that follows, so both are carried around as small `Copy` enums
//! rather than re-read from the header.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 12;
pub const MAGIC: &[u8; 7] = b"BLENDER";
pub const MAX_VERSION: u16 = 999;

// ── PointerWidth ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PointerWidth {
    Four,
    Eight,
}

impl PointerWidth {
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            PointerWidth::Four  => 4,
            PointerWidth::Eight => 8,
        }
    }

    fn marker(self) -> u8 {
        match self {
            PointerWidth::Four  => b'_',
            PointerWidth::Eight => b'-',
        }
    }

    fn from_marker(b: u8) -> Option<Self> {
        match b {
            b'_' => Some(PointerWidth::Four),
            b'-' => Some(PointerWidth::Eight),
            _    => None,
        }
    }

    /// Read one address-sized field from the front of `buf`.
    pub fn read_address(self, endian: Endian, buf: &[u8]) -> u64 {
        match self {
            PointerWidth::Four  => u64::from(endian.read_u32(buf)),
            PointerWidth::Eight => endian.read_u64(buf),
        }
    }

    /// Write one address-sized field into the front of `buf`.
    ///
    /// Fails if `address` does not fit in a 4-byte field.
    pub fn write_address(self, endian: Endian, buf: &mut [u8], address: u64) -> Result<()> {
        match self {
            PointerWidth::Four => {
                let narrow = u32::try_from(address).map_err(|_| {
                    Error::Format(format!("address {address:#x} does not fit a 4-byte pointer"))
                })?;
                endian.write_u32(buf, narrow);
            }
            PointerWidth::Eight => endian.write_u64(buf, address),
        }
        Ok(())
    }
}

// ── Endian ───────────────────────────────────────────────────────────────────

/// Runtime byte order. Dispatches to the matching `byteorder` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Endian {
    Little,
    Big,
}

macro_rules! endian_rw {
    ($($read:ident, $write:ident => $ty:ty;)*) => {
        impl Endian {
            $(
                #[inline]
                pub fn $read(self, buf: &[u8]) -> $ty {
                    match self {
                        Endian::Little => LittleEndian::$read(buf),
                        Endian::Big    => BigEndian::$read(buf),
                    }
                }

                #[inline]
                pub fn $write(self, buf: &mut [u8], n: $ty) {
                    match self {
                        Endian::Little => LittleEndian::$write(buf, n),
                        Endian::Big    => BigEndian::$write(buf, n),
                    }
                }
            )*
        }
    };
}

endian_rw! {
    read_u16, write_u16 => u16;
    read_i16, write_i16 => i16;
    read_u32, write_u32 => u32;
    read_i32, write_i32 => i32;
    read_u64, write_u64 => u64;
    read_i64, write_i64 => i64;
}

impl Endian {
    fn marker(self) -> u8 {
        match self {
            Endian::Little => b'v',
            Endian::Big    => b'V',
        }
    }

    fn from_marker(b: u8) -> Option<Self> {
        match b {
            b'v' => Some(Endian::Little),
            b'V' => Some(Endian::Big),
            _    => None,
        }
    }

    pub fn put_u16(self, out: &mut Vec<u8>, n: u16) {
        let mut b = [0u8; 2];
        self.write_u16(&mut b, n);
        out.extend_from_slice(&b);
    }

    pub fn put_u32(self, out: &mut Vec<u8>, n: u32) {
        let mut b = [0u8; 4];
        self.write_u32(&mut b, n);
        out.extend_from_slice(&b);
    }
}

// ── FileHeader ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    pub pointer_width: PointerWidth,
    pub endian:        Endian,
    pub version:       u16,
}

impl FileHeader {
    pub fn new(pointer_width: PointerWidth, endian: Endian, version: u16) -> Self {
        Self { pointer_width, endian, version }
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let magic = &buf[0..7];
        if magic != MAGIC {
            return Err(Error::Format(format!(
                "invalid file identifier: {:?}",
                String::from_utf8_lossy(magic)
            )));
        }

        let pointer_width = PointerWidth::from_marker(buf[7]).ok_or_else(|| {
            Error::Format(format!("invalid pointer size character: {:?}", buf[7] as char))
        })?;

        let endian = Endian::from_marker(buf[8]).ok_or_else(|| {
            Error::Format(format!("invalid byte order character: {:?}", buf[8] as char))
        })?;

        let digits = &buf[9..12];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(Error::Format(format!(
                "invalid version: {:?}",
                String::from_utf8_lossy(digits)
            )));
        }
        let version = digits.iter().fold(0u16, |v, d| v * 10 + u16::from(d - b'0'));

        Ok(Self { pointer_width, endian, version })
    }

    pub fn encode(&self) -> Result<[u8; HEADER_SIZE]> {
        if self.version > MAX_VERSION {
            return Err(Error::Format(format!(
                "version {} does not fit in three digits",
                self.version
            )));
        }

        let mut buf = [0u8; HEADER_SIZE];
        buf[0..7].copy_from_slice(MAGIC);
        buf[7] = self.pointer_width.marker();
        buf[8] = self.endian.marker();
        buf[9..12].copy_from_slice(format!("{:03}", self.version).as_bytes());
        Ok(buf)
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::decode(&buf)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.encode()?)?;
        Ok(())
    }
}
