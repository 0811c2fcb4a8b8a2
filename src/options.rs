use std::sync::Arc;

use crate::registry::VersionRegistry;

/// Options controlling how a document is decoded.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Layout strategies by format version.
    pub registry:             Arc<VersionRegistry>,
    /// Fail on an end marker that declares a body instead of recording an
    /// anomaly.
    pub strict_end_marker:    bool,
    /// Decode a catalog-typed body that is longer than `count` instances,
    /// ignoring the excess with a warning. Re-encoding such a block drops
    /// the excess. Off by default, where the excess is a `BodySize` error.
    pub allow_trailing_bytes: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            registry:             Arc::new(VersionRegistry::builtin()),
            strict_end_marker:    false,
            allow_trailing_bytes: false,
        }
    }
}
