//! Codec for `BLENDER` block-stream containers.
//!
//! A document is a 12-byte [`FileHeader`] followed by length-prefixed
//! [`Block`]s and an end marker. One block (`DNA1`) carries a [`Catalog`]
//! describing the layout of every structure the other blocks hold; bodies
//! are decoded lazily through the layout strategy the [`VersionRegistry`]
//! selects for the document's format version.
//!
//! ```no_run
//! use blendcodec::{Body, Document};
//!
//! let mut doc = Document::open("scene.blend")?;
//! doc.load_catalog()?;
//! for index in 0..doc.blocks().len() {
//!     if let Ok(Body::Struct(value)) = doc.decode_block(index) {
//!         println!("{} {}", index, value.type_name);
//!     }
//! }
//! # Ok::<(), blendcodec::Error>(())
//! ```

pub mod address;
pub mod block;
pub mod catalog;
pub mod document;
pub mod error;
pub mod header;
pub mod layout;
pub mod options;
pub mod parallel;
pub mod registry;
pub mod source;
pub mod value;

pub use address::{AddressAllocator, AddressIndex};
pub use block::{Block, BlockCode, BlockHeader, Body, ByteRange};
pub use catalog::{Catalog, CatalogBuilder};
pub use document::Document;
pub use error::{Anomaly, Error, Result};
pub use header::{Endian, FileHeader, PointerWidth};
pub use layout::CatalogLayout;
pub use options::DecodeOptions;
pub use registry::{LayoutContext, LayoutStrategy, VersionRegistry};
pub use source::{BlendSource, Compression};
pub use value::{Field, Pointer, StructValue, Value};
