//! Listing results and the options that shape a listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One listing result.
///
/// Keys are `/`-separated with no leading slash. Entries are produced lazily
/// by a listing and never persisted on their own.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Normalized object key.
    pub key: String,

    /// Size of the primary content in bytes.
    pub size: u64,

    /// Last modification time reported by the backend.
    pub modified: DateTime<Utc>,
}

/// Options accepted by `list`.
///
/// `marker` has strict resume-after semantics: keys less than or equal to it
/// are skipped. `limit` bounds the whole sequence, not a single page.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
