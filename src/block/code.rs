use std::fmt;

use serde::{Serialize, Serializer};

/// Four-byte block tag, ASCII and nul-padded on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockCode(pub [u8; 4]);

impl BlockCode {
    /// Opaque byte payload.
    pub const DATA: Self = Self(*b"DATA");
    /// Structure catalog.
    pub const DNA1: Self = Self(*b"DNA1");
    /// Sentinel end record.
    pub const ENDB: Self = Self(*b"ENDB");
    pub const REND: Self = Self(*b"REND");
    pub const TEST: Self = Self(*b"TEST");
    pub const GLOB: Self = Self(*b"GLOB");

    pub const AC: Self = Self(*b"AC\0\0");
    pub const AR: Self = Self(*b"AR\0\0");
    pub const BR: Self = Self(*b"BR\0\0");
    pub const CA: Self = Self(*b"CA\0\0");
    pub const CU: Self = Self(*b"CU\0\0");
    pub const GR: Self = Self(*b"GR\0\0");
    pub const ID: Self = Self(*b"ID\0\0");
    pub const IM: Self = Self(*b"IM\0\0");
    pub const LA: Self = Self(*b"LA\0\0");
    pub const LI: Self = Self(*b"LI\0\0");
    pub const LS: Self = Self(*b"LS\0\0");
    pub const MA: Self = Self(*b"MA\0\0");
    pub const ME: Self = Self(*b"ME\0\0");
    pub const NT: Self = Self(*b"NT\0\0");
    pub const OB: Self = Self(*b"OB\0\0");
    pub const PL: Self = Self(*b"PL\0\0");
    pub const SC: Self = Self(*b"SC\0\0");
    pub const SN: Self = Self(*b"SN\0\0");
    pub const SO: Self = Self(*b"SO\0\0");
    pub const SR: Self = Self(*b"SR\0\0");
    pub const TE: Self = Self(*b"TE\0\0");
    pub const TX: Self = Self(*b"TX\0\0");
    pub const VF: Self = Self(*b"VF\0\0");
    pub const WM: Self = Self(*b"WM\0\0");
    pub const WO: Self = Self(*b"WO\0\0");
    pub const WS: Self = Self(*b"WS\0\0");

    const KNOWN: &'static [BlockCode] = &[
        Self::DATA, Self::DNA1, Self::ENDB, Self::REND, Self::TEST, Self::GLOB,
        Self::AC, Self::AR, Self::BR, Self::CA, Self::CU, Self::GR, Self::ID,
        Self::IM, Self::LA, Self::LI, Self::LS, Self::MA, Self::ME, Self::NT,
        Self::OB, Self::PL, Self::SC, Self::SN, Self::SO, Self::SR, Self::TE,
        Self::TX, Self::VF, Self::WM, Self::WO, Self::WS,
    ];

    /// Build a code from a name of at most four ASCII bytes, nul-padding the
    /// remainder.
    pub fn from_name(name: &str) -> Option<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !name.is_ascii() {
            return None;
        }
        let mut code = [0u8; 4];
        code[..bytes.len()].copy_from_slice(bytes);
        Some(Self(code))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Code text up to the first nul.
    pub fn name(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(4);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    pub fn is_known(&self) -> bool {
        Self::KNOWN.contains(self)
    }
}

impl fmt::Display for BlockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for BlockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.name())
    }
}

impl Serialize for BlockCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}
