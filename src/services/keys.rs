//! Key normalization: turns caller keys into canonical `/`-separated keys
//! and sandboxes them beneath a storage root.

use std::path::{Component, Path, PathBuf};

use super::storage_service::{StorageError, StorageResult};

/// Reserved suffix of metadata sidecar files. Never a valid key suffix.
pub const SIDECAR_SUFFIX: &str = ".__meta.json";

/// Collapse `key` into canonical form.
///
/// Backslashes count as separators, empty and `.` segments vanish, and `..`
/// pops a segment but can never climb above the root.
pub fn normalize_key(key: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in key.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Normalize a key that must name an object. No segment may carry the
/// sidecar suffix, or the key would hide behind a sidecar-named directory.
pub fn object_key(key: &str) -> StorageResult<String> {
    let normalized = normalize_key(key);
    if normalized.is_empty() || normalized.split('/').any(is_sidecar_name) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(normalized)
}

/// Path of `key` inside `root`.
pub fn resolve(root: &Path, key: &str) -> StorageResult<PathBuf> {
    Ok(join(root, &object_key(key)?))
}

/// Path a listing prefix points at. An empty prefix is the root itself.
pub fn resolve_prefix(root: &Path, prefix: &str) -> PathBuf {
    join(root, &normalize_key(prefix))
}

fn join(root: &Path, normalized: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    path.extend(normalized.split('/').filter(|s| !s.is_empty()));
    path
}

/// Derive the key of a path found beneath `root`.
pub fn key_for_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => segments.push(name.to_str()?),
            _ => return None,
        }
    }
    Some(segments.join("/"))
}

pub fn is_sidecar_name(name: &str) -> bool {
    name.ends_with(SIDECAR_SUFFIX)
}

/// Sidecar location for an object path.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(SIDECAR_SUFFIX);
    PathBuf::from(raw)
}

/// Object-store prefixes keep their trailing slash and are matched as raw
/// string prefixes; only a leading slash and backslashes are cleaned up.
pub fn object_prefix(prefix: &str) -> String {
    prefix.replace('\\', "/").trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_cannot_escape_root() {
        assert_eq!(normalize_key("../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize_key("/a/./b/../c"), "a/c");
        assert_eq!(normalize_key("a\\b\\c"), "a/b/c");
        assert_eq!(normalize_key("//a//"), "a");
    }

    #[test]
    fn resolve_stays_under_root() {
        let root = Path::new("/srv/blobs");
        let path = resolve(root, "../../../x/y").unwrap();
        assert_eq!(path, Path::new("/srv/blobs/x/y"));
        assert!(path.starts_with(root));
    }

    #[test]
    fn empty_and_reserved_keys_are_rejected() {
        assert!(matches!(object_key("/"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(object_key(".."), Err(StorageError::InvalidKey(_))));
        assert!(matches!(
            object_key("a.__meta.json"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            object_key("x.__meta.json/y"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(object_key("x.__meta.json.bak/y").is_ok());
    }

    #[test]
    fn key_round_trips_through_path() {
        let root = Path::new("/srv/blobs");
        let path = resolve(root, "photos/2025/img.jpg").unwrap();
        assert_eq!(
            key_for_path(root, &path).as_deref(),
            Some("photos/2025/img.jpg")
        );
        assert_eq!(key_for_path(root, Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn sidecar_sits_next_to_object() {
        let path = sidecar_path(Path::new("/srv/blobs/a/b"));
        assert_eq!(path, Path::new("/srv/blobs/a/b.__meta.json"));
        assert!(is_sidecar_name("b.__meta.json"));
    }

    #[test]
    fn object_prefix_keeps_trailing_slash() {
        assert_eq!(object_prefix("/dir/"), "dir/");
        assert_eq!(object_prefix("he"), "he");
    }
}
