//! Field paths and collector identities

use crate::{LoaderError, LoaderResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace prefixed to every collector identity
pub const DEFAULT_NAMESPACE: &str = "dataloader";

/// One segment of a field's position in the query tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name or alias
    Field(String),
    /// A position inside a list
    Index(usize),
}

impl PathSegment {
    /// List indices, and field segments made only of digits, do not take part
    /// in collector identity
    pub fn is_index(&self) -> bool {
        match self {
            PathSegment::Index(_) => true,
            PathSegment::Field(name) => !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(name: &str) -> Self {
        PathSegment::Field(name.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(name: String) -> Self {
        PathSegment::Field(name)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Build the collector identity for a field path
///
/// Index segments are dropped so `posts[0].author` and `posts[1].author` share one
/// identity, the remaining segments are joined with `.` and prefixed with the
/// namespace.
pub fn instance_identity(namespace: &str, path: &[PathSegment]) -> String {
    let fields: Vec<String> = path
        .iter()
        .filter(|segment| !segment.is_index())
        .map(|segment| segment.to_string())
        .collect();
    format!("{}:{}", namespace, fields.join("."))
}

/// Ordered field path as handed over by the tree walker
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a field name
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Field(name.into()));
        self
    }

    /// Append a list index
    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(PathSegment::Index(index));
        self
    }

    pub fn push(&mut self, segment: impl Into<PathSegment>) {
        self.segments.push(segment.into());
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Identity under [`DEFAULT_NAMESPACE`]
    pub fn identity(&self) -> String {
        instance_identity(DEFAULT_NAMESPACE, &self.segments)
    }
}

impl AsRef<[PathSegment]> for FieldPath {
    fn as_ref(&self) -> &[PathSegment] {
        &self.segments
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
                PathSegment::Field(name) if i == 0 => f.write_str(name)?,
                PathSegment::Field(name) => write!(f, ".{}", name)?,
            }
        }
        Ok(())
    }
}

/// Parses `posts[0].author` as well as `posts.0.author`
impl FromStr for FieldPath {
    type Err = LoaderError;

    fn from_str(s: &str) -> LoaderResult<Self> {
        let mut path = FieldPath::new();
        for part in s.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if !name.is_empty() {
                path.push(name);
            } else if rest.is_empty() {
                return Err(LoaderError::Configuration(format!(
                    "empty segment in field path '{}'",
                    s
                )));
            }
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(|| {
                    LoaderError::Configuration(format!("unclosed '[' in field path '{}'", s))
                })?;
                let index = rest[1..close].parse::<usize>().map_err(|_| {
                    LoaderError::Configuration(format!(
                        "invalid list index '{}' in field path '{}'",
                        &rest[1..close],
                        s
                    ))
                })?;
                path.push(index);
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(LoaderError::Configuration(format!(
                        "unexpected '{}' in field path '{}'",
                        rest, s
                    )));
                }
            }
        }
        Ok(path)
    }
}
