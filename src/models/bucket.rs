//! Describes where an object-store session lives.

use serde::{Deserialize, Serialize};

/// Region used when the caller does not pick one.
pub const DEFAULT_REGION: &str = "us-west-2";

/// A remote bucket plus the key namespace applied to every operation.
///
/// The namespace prefix is prepended to keys on the way in and stripped
/// from listing results on the way out, so callers never see it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketLocation {
    /// Bucket (container) name.
    pub name: String,

    /// Region the bucket is provisioned in (e.g. "us-west-2").
    pub region: String,

    /// Optional key namespace, e.g. "tenants/acme/".
    pub prefix: Option<String>,
}

impl BucketLocation {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Prepend the namespace to a caller key.
    pub fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }

    /// Strip the namespace from a backend key. Returns `None` for keys that
    /// live outside the namespace.
    pub fn caller_key<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        match &self.prefix {
            Some(prefix) => full_key.strip_prefix(prefix.as_str()),
            None => Some(full_key),
        }
    }
}
