use std::fmt;
use std::sync::Arc;

use crate::CoordError;

/// Hierarchical path into the coordination tree, e.g. `/maps/<endpoint>`.
///
/// Segments are non-empty and never contain `/`. Callers embedding arbitrary
/// UTF-8 in a segment encode it path-safely first.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordPath {
    segments: Vec<String>,
}

impl CoordPath {
    /// The tree root, `/`.
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Parses an absolute path such as `/maps/orders`.
    pub fn parse(path: &str) -> Result<Self, CoordError> {
        let Some(rest) = path.strip_prefix('/') else {
            return Err(CoordError::InvalidPath(path.to_owned()));
        };
        if rest.is_empty() {
            return Ok(Self::root());
        }
        let mut parsed = Self::root();
        for segment in rest.split('/') {
            parsed = parsed.child(segment)?;
        }
        Ok(parsed)
    }

    /// Extends the path by one validated segment.
    pub fn child(&self, segment: impl AsRef<str>) -> Result<Self, CoordError> {
        let segment = segment.as_ref();
        if segment.is_empty() || segment.contains('/') {
            return Err(CoordError::InvalidSegment(segment.to_owned()));
        }
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment.to_owned());
        Ok(Self { segments })
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self { segments: parent.to_vec() })
    }

    /// The final segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn starts_with(&self, prefix: &CoordPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }
}

impl fmt::Display for CoordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CoordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoordPath({self})")
    }
}

/// Lifetime of a created node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// The node outlives the creating session.
    Persistent,
    /// The node vanishes when the creating session ends.
    Ephemeral,
}

/// Identity of a coordination-service session.
///
/// Session ids are path-safe: they appear verbatim as path segments of
/// session-scoped entries.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}
