//! Path helpers for the node namespace.

use crate::error::KeeperError;

/// Join a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Parent of `path`, or `None` for the root.
///
/// ```
/// assert_eq!(keeper_types::path::parent("/a/b"), Some("/a"));
/// assert_eq!(keeper_types::path::parent("/a"), Some("/"));
/// assert_eq!(keeper_types::path::parent("/"), None);
/// ```
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component of `path`.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Ancestors of `path` from the top down, excluding the root and `path` itself.
///
/// `/a/b/c` yields `/a`, `/a/b`.
pub fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .map(|(idx, _)| idx)
        .filter(|&idx| idx > 0)
        .map(|idx| &path[..idx])
        .collect()
}

/// Sequence number of a sequential node name: the decimal digits after the last `-`.
///
/// Returns `None` if the name has no such suffix.
pub fn sequence_of(name: &str) -> Option<u64> {
    let (_, suffix) = name.rsplit_once('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Check that `path` is absolute, has no empty components and no trailing slash.
pub fn validate(path: &str) -> Result<(), KeeperError> {
    let invalid = |reason: &str| {
        Err(KeeperError::InvalidArgument {
            reason: format!("invalid path '{path}': {reason}"),
        })
    };
    if !path.starts_with('/') {
        return invalid("must be absolute");
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("trailing slash");
    }
    if path.contains("//") {
        return invalid("empty component");
    }
    Ok(())
}
