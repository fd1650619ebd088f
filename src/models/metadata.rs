//! User metadata attached to objects.

use std::collections::BTreeMap;

/// Flat string-to-string metadata associated 1:1 with an object.
///
/// The filesystem backend stores it in a sidecar next to the object; the
/// object-store backend carries it in the object header.
pub type Metadata = BTreeMap<String, String>;

/// Header prefix used to carry metadata entries over HTTP.
pub const METADATA_HEADER_PREFIX: &str = "x-amz-meta-";

/// Treat an empty map as absent metadata.
///
/// Object stores cannot distinguish "no metadata" from "empty metadata", so
/// both backends report absence consistently.
pub fn non_empty(metadata: Option<Metadata>) -> Option<Metadata> {
    metadata.filter(|m| !m.is_empty())
}
