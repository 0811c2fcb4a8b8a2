//! Error taxonomy and non-fatal integrity anomalies.
//!
//! Everything that aborts an operation is an [`Error`]. Header and framing
//! failures abort a whole document decode; body decode/encode failures are
//! scoped to the one block being processed.
//!
//! Conditions that are suspicious but survivable (a reused old address, an
//! unregistered format version, a sentinel that declares a body) are an
//! [`Anomaly`]. They are logged at `warn` level and collected on the
//! document so tooling can inspect them after a successful decode.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::block::{BlockCode, BlockHeader};

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed file header or block framing.
    #[error("Format error: {0}")]
    Format(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Recognised but unimplemented input encoding (e.g. gzip).
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// A zero-catalog-index block whose code has no decode rule.
    #[error("No decode rule for block code {0:?}")]
    UnsupportedBlockCode(BlockCode),
    #[error("Catalog-indexed block decoded before the catalog was loaded")]
    CatalogNotReady,
    #[error("Document has no {0} block")]
    MissingCatalog(BlockCode),
    #[error("Malformed catalog: {0}")]
    MalformedCatalog(String),
    #[error("Unknown structure: {0}")]
    UnknownStruct(String),
    /// A value handed to the encoder does not have the shape its catalog
    /// entry declares.
    #[error("Layout mismatch for {type_name}: {detail}")]
    LayoutMismatch { type_name: String, detail: String },
    #[error("Body of {type_name} is {actual} bytes, expected {expected} ({count} x {size})")]
    BodySize {
        type_name: String,
        expected:  usize,
        actual:    usize,
        count:     u32,
        size:      usize,
    },
    #[error("No block at index {0}")]
    NoSuchBlock(usize),
    #[error("Synthetic address space exhausted")]
    AddressSpaceExhausted,
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn mismatch(type_name: &str, detail: impl Into<String>) -> Error {
    Error::LayoutMismatch { type_name: type_name.to_owned(), detail: detail.into() }
}

/// A non-fatal integrity finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Two framed blocks declared the same old address with different
    /// headers. The later block owns the address.
    DuplicateAddress {
        address:  u64,
        previous: BlockHeader,
        current:  BlockHeader,
    },
    /// No layout strategy is registered for the header's format version;
    /// the registry default was used instead.
    UnregisteredVersion { version: u16, fallback: u16 },
    /// The sentinel end record declared a nonzero body size. Nothing was
    /// consumed for it.
    NonConformantEndMarker { declared_size: u32 },
    /// More than one catalog block was found; only the first is used.
    ExtraCatalog { block_index: usize },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::DuplicateAddress { address, previous, current } => write!(
                f,
                "multiple occurrences of address {address:#x} ({} x{} -> {} x{})",
                previous.code, previous.count, current.code, current.count,
            ),
            Anomaly::UnregisteredVersion { version, fallback } => write!(
                f,
                "format version {version} has no registered layout, using {fallback}",
            ),
            Anomaly::NonConformantEndMarker { declared_size } => write!(
                f,
                "end marker declares a {declared_size}-byte body, treated as empty",
            ),
            Anomaly::ExtraCatalog { block_index } => write!(
                f,
                "additional catalog block at index {block_index} ignored",
            ),
        }
    }
}
