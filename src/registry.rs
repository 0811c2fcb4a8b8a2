//! Format-version → layout strategy registry.
//!
//! The registry is immutable once built and is handed to a document through
//! [`DecodeOptions`](crate::options::DecodeOptions). Looking up a version
//! that has no strategy never fails: the default strategy is returned along
//! with an [`Anomaly::UnregisteredVersion`], on the assumption that a nearby
//! version's layout rules are close enough to be useful.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::block::Body;
use crate::catalog::Catalog;
use crate::error::{Anomaly, Result};
use crate::header::{Endian, PointerWidth};
use crate::layout::CatalogLayout;

/// Format versions shipped with a strategy.
pub const BUILTIN_VERSIONS: &[u16] = &[305, 400, 401];
/// Version whose strategy stands in for unregistered ones.
pub const DEFAULT_VERSION: u16 = 400;

/// Everything a strategy needs besides the bytes themselves.
#[derive(Debug, Clone, Copy)]
pub struct LayoutContext<'a> {
    pub catalog:       &'a Catalog,
    pub endian:        Endian,
    pub pointer_width: PointerWidth,
}

/// Turns block bodies into typed values and back for one format version.
///
/// `decode` of `count == 1` yields [`Body::Struct`]; any other count yields
/// [`Body::Sequence`] of exactly `count` instances laid out back to back.
pub trait LayoutStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn decode(&self, ctx: &LayoutContext<'_>, type_name: &str, bytes: &[u8], count: u32) -> Result<Body>;

    fn encode(&self, ctx: &LayoutContext<'_>, type_name: &str, body: &Body, count: u32) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct VersionRegistry {
    strategies:      HashMap<u16, Arc<dyn LayoutStrategy>>,
    default_version: u16,
    default:         Arc<dyn LayoutStrategy>,
}

impl VersionRegistry {
    /// Registry whose fallback is `strategy`, registered under `default_version`.
    pub fn new(default_version: u16, strategy: Arc<dyn LayoutStrategy>) -> Self {
        let mut strategies = HashMap::new();
        strategies.insert(default_version, Arc::clone(&strategy));
        Self { strategies, default_version, default: strategy }
    }

    /// Every built-in version mapped to the catalog-driven layout.
    pub fn builtin() -> Self {
        let layout: Arc<dyn LayoutStrategy> = Arc::new(CatalogLayout);
        BUILTIN_VERSIONS
            .iter()
            .fold(Self::new(DEFAULT_VERSION, Arc::clone(&layout)), |reg, &v| {
                reg.with_strategy(v, Arc::clone(&layout))
            })
    }

    pub fn with_strategy(mut self, version: u16, strategy: Arc<dyn LayoutStrategy>) -> Self {
        if version == self.default_version {
            self.default = Arc::clone(&strategy);
        }
        self.strategies.insert(version, strategy);
        self
    }

    pub fn default_version(&self) -> u16 {
        self.default_version
    }

    pub fn is_registered(&self, version: u16) -> bool {
        self.strategies.contains_key(&version)
    }

    /// Registered versions in ascending order.
    pub fn versions(&self) -> Vec<u16> {
        let mut v: Vec<u16> = self.strategies.keys().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn resolve(&self, version: u16) -> (Arc<dyn LayoutStrategy>, Option<Anomaly>) {
        match self.strategies.get(&version) {
            Some(s) => (Arc::clone(s), None),
            None => (
                Arc::clone(&self.default),
                Some(Anomaly::UnregisteredVersion { version, fallback: self.default_version }),
            ),
        }
    }
}

impl Default for VersionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
