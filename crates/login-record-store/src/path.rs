//! Validated paths into the record tree.

use crate::{StoreError, StoreResult};
use std::fmt;

/// Characters the record store rejects inside a path segment.
const RESERVED_CHARS: &[char] = &['.', '#', '$', '[', ']'];

/// A validated, slash-separated location in the record tree, such as
/// `digits/logins/abc123`.
///
/// Paths are immutable; [`child`](Self::child) returns a new deeper path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// Parse a path from a slash-separated string. Leading and trailing
    /// slashes are ignored. Fails on empty paths, empty segments, and
    /// segments containing reserved characters.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(StoreError::InvalidPath(
                "path must be a non-empty path string".to_string(),
            ));
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            validate_segment(segment)?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Return a new path one level deeper.
    pub fn child(&self, segment: &str) -> StoreResult<Self> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// The path's segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The final segment, i.e. the key of the location this path points at.
    pub fn key(&self) -> &str {
        self.segments
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// The parent path, or None for a single-segment path.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether `other` lies strictly below this path, at any depth.
    pub fn is_ancestor_of(&self, other: &StorePath) -> bool {
        other.segments.len() > self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

fn validate_segment(segment: &str) -> StoreResult<()> {
    if segment.is_empty() {
        return Err(StoreError::InvalidPath(
            "path segments must be non-empty".to_string(),
        ));
    }
    if segment.contains(RESERVED_CHARS) || segment.contains('/') {
        return Err(StoreError::InvalidPath(format!(
            "segment {:?} contains a reserved character",
            segment
        )));
    }
    Ok(())
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}
