//! Canonical hierarchical paths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DataspaceError, Result};

/// Characters that may never appear in a [`Path`].
pub const FORBIDDEN_PATH_CHARS: [char; 5] = ['?', '#', '[', ']', '*'];

/// A set of strings separated by `/`, as in a filesystem path.
///
/// A path never contains wildcards. It can be absolute (starting with `/`)
/// or relative to a [`Workspace`](crate::workspace::Workspace) root.
/// Repeated slashes are collapsed and a trailing slash is stripped, except
/// for the root path `/` itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    path: String,
}

impl Path {
    /// Parse and canonicalize a path.
    ///
    /// Fails on an empty string, or on the first forbidden character
    /// (`? # [ ] *`), whose byte index is reported.
    pub fn new(p: impl AsRef<str>) -> Result<Self> {
        let p = p.as_ref();
        if p.is_empty() {
            return Err(DataspaceError::invalid_path(p, "empty string", None));
        }

        if let Some((i, _)) = p.char_indices().find(|(_, c)| FORBIDDEN_PATH_CHARS.contains(c)) {
            return Err(DataspaceError::invalid_path(
                p,
                format!("forbidden character at index {}", i),
                Some(i),
            ));
        }

        Ok(Self { path: canonicalize(p) })
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Length of the path string in bytes.
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Always false for a constructed path.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// True if the path does not start with `/`.
    pub fn is_relative(&self) -> bool {
        !self.path.starts_with('/')
    }

    /// A new path made from `prefix`, a separator, and this path.
    pub fn add_prefix(&self, prefix: &Path) -> Result<Path> {
        Path::new(format!("{}/{}", prefix.path, self.path))
    }

    /// The last segment of the path.
    pub fn last_segment(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Collapse runs of `/` into one and drop a trailing `/`.
pub(crate) fn canonicalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_slash = false;
    for c in s.chars() {
        if c == '/' {
            if !previous_slash {
                out.push(c);
            }
            previous_slash = true;
        } else {
            out.push(c);
            previous_slash = false;
        }
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl FromStr for Path {
    type Err = DataspaceError;

    fn from_str(s: &str) -> Result<Self> {
        Path::new(s)
    }
}

impl TryFrom<String> for Path {
    type Error = DataspaceError;

    fn try_from(s: String) -> Result<Self> {
        Path::new(s)
    }
}

impl From<Path> for String {
    fn from(p: Path) -> Self {
        p.path
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_path_collapses_slashes() {
        let p = Path::new("//demo///example//test/").unwrap();
        assert_eq!(p.as_str(), "/demo/example/test");
    }

    #[test]
    fn test_path_root_is_kept() {
        assert_eq!(Path::new("/").unwrap().as_str(), "/");
        assert_eq!(Path::new("///").unwrap().as_str(), "/");
    }

    #[test]
    fn test_path_is_fixed_point() {
        for s in ["a//b/", "/x/y", "////", "rel/a///b//", "/a/b/c/"] {
            let once = Path::new(s).unwrap();
            let twice = Path::new(once.as_str()).unwrap();
            assert_eq!(once, twice);
            assert!(!once.as_str().contains("//"));
            assert!(once.as_str() == "/" || !once.as_str().ends_with('/'));
        }
    }

    #[test]
    fn test_path_rejects_empty() {
        let err = Path::new("").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPath);
    }

    #[test]
    fn test_path_reports_first_forbidden_index() {
        let err = Path::new("/a/b?c*").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPath);
        assert_eq!(err.details().context.get("index"), Some(&serde_json::json!(4)));

        for (s, idx) in [("*", 0), ("/x#", 2), ("/[y]", 1), ("/ab]", 3)] {
            let err = Path::new(s).unwrap_err();
            assert_eq!(err.details().context.get("index"), Some(&serde_json::json!(idx)));
        }
    }

    #[test]
    fn test_path_relative() {
        assert!(Path::new("a/b").unwrap().is_relative());
        assert!(!Path::new("/a/b").unwrap().is_relative());
    }

    #[test]
    fn test_add_prefix() {
        let root = Path::new("/demo/").unwrap();
        let rel = Path::new("a/b").unwrap();
        assert_eq!(rel.add_prefix(&root).unwrap().as_str(), "/demo/a/b");
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(Path::new("/a/b/storage-1").unwrap().last_segment(), "storage-1");
        assert_eq!(Path::new("single").unwrap().last_segment(), "single");
    }

    #[test]
    fn test_path_serde_validates() {
        let p: Path = serde_json::from_str("\"/a//b\"").unwrap();
        assert_eq!(p.as_str(), "/a/b");
        assert!(serde_json::from_str::<Path>("\"/a/*\"").is_err());
    }
}
