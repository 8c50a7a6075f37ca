//! Path parsing and validation.
//!
//! Paths are absolute and `/`-delimited. Repeated and trailing slashes are
//! collapsed; `.` and `..` are rejected rather than interpreted, since there
//! is no notion of a working directory.

use std::fmt;

use crate::types::MetaError;

/// A validated, normalized absolute path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NsPath {
    segments: Vec<String>,
}

impl NsPath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a path into components. Handles "/", "//", leading/trailing slashes.
    pub fn parse(path: &str) -> Result<Self, MetaError> {
        let invalid = |reason: &str| MetaError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        if !path.starts_with('/') {
            return Err(invalid("path must be absolute"));
        }
        if path.contains('\0') {
            return Err(invalid("path contains NUL"));
        }

        let mut segments = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(invalid("relative segments are not supported"));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// True for `/`.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments; `/` has depth 0.
    pub fn depth(&self) -> u64 {
        self.segments.len() as u64
    }

    /// Byte length of the normalized string form.
    pub fn byte_len(&self) -> u64 {
        if self.segments.is_empty() {
            return 1;
        }
        self.segments.iter().map(|s| s.len() as u64 + 1).sum()
    }

    /// Path segments from the root down.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<NsPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Proper ancestors from the shallowest (excluding `/`) to the parent.
    pub fn ancestors(&self) -> impl Iterator<Item = NsPath> + '_ {
        (1..self.segments.len()).map(move |n| Self {
            segments: self.segments[..n].to_vec(),
        })
    }

    /// True if `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &NsPath) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

impl fmt::Display for NsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root() {
        let p = NsPath::parse("/").unwrap();
        assert!(p.is_root());
        assert_eq!(p.depth(), 0);
        assert_eq!(p.byte_len(), 1);
        assert_eq!(p.to_string(), "/");
        assert!(p.parent().is_none());
        assert!(p.file_name().is_none());
    }

    #[test]
    fn test_parse_collapses_slashes() {
        let p = NsPath::parse("//a///b/").unwrap();
        assert_eq!(p.segments(), &["a".to_string(), "b".to_string()]);
        assert_eq!(p.to_string(), "/a/b");
        assert_eq!(p.byte_len(), 4);
        assert_eq!(p.depth(), 2);
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        for bad in ["", "a/b", "/a/../b", "/./a", "/a\0b"] {
            assert!(
                matches!(NsPath::parse(bad), Err(MetaError::InvalidPath { .. })),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parent_and_file_name() {
        let p = NsPath::parse("/docs/report.txt").unwrap();
        assert_eq!(p.file_name(), Some("report.txt"));
        assert_eq!(p.parent().unwrap().to_string(), "/docs");
        assert!(p.parent().unwrap().parent().unwrap().is_root());
    }

    #[test]
    fn test_ancestors_exclude_root_and_self() {
        let p = NsPath::parse("/a/b/c").unwrap();
        let ancestors: Vec<String> = p.ancestors().map(|a| a.to_string()).collect();
        assert_eq!(ancestors, vec!["/a", "/a/b"]);
        assert_eq!(NsPath::parse("/a").unwrap().ancestors().count(), 0);
    }

    #[test]
    fn test_starts_with() {
        let a = NsPath::parse("/a").unwrap();
        let ab = NsPath::parse("/a/b").unwrap();
        let abc = NsPath::parse("/abc").unwrap();
        assert!(ab.starts_with(&a));
        assert!(a.starts_with(&a));
        assert!(!abc.starts_with(&a));
        assert!(a.starts_with(&NsPath::root()));
    }

    #[test]
    fn test_byte_len_counts_utf8_bytes() {
        let p = NsPath::parse("/é").unwrap();
        assert_eq!(p.byte_len(), 3);
    }
}
