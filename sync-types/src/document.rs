//! Remote document paths and documents.
//!
//! The canonical store is hierarchical: a document path alternates
//! collection and document segments (`users/alice/cities/paris`). Parent and
//! owner ids are read positionally from the path rather than from fields.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Fields, ModelError};

/// Path of a document in the remote hierarchy.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    /// Start a path at a top-level document.
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            segments: vec![collection.to_string(), id.to_string()],
        }
    }

    /// Extend this path with a sub-collection document.
    pub fn child(&self, collection: &str, id: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(collection.to_string());
        segments.push(id.to_string());
        Self { segments }
    }

    /// Parse a slash-separated path.
    pub fn parse(path: &str) -> Result<Self, ModelError> {
        let segments: Vec<String> = path
            .trim_matches('/')
            .split('/')
            .map(str::to_string)
            .collect();

        if segments.iter().any(String::is_empty) {
            return Err(ModelError::InvalidPath {
                path: path.to_string(),
                reason: "empty segment",
            });
        }
        if segments.len() % 2 != 0 {
            return Err(ModelError::InvalidPath {
                path: path.to_string(),
                reason: "path must end at a document",
            });
        }

        Ok(Self { segments })
    }

    /// The document id (last segment).
    pub fn id(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// The collection the document lives in.
    pub fn collection(&self) -> &str {
        &self.segments[self.segments.len() - 2]
    }

    /// Id of the document `levels` document-levels above this one.
    ///
    /// `ancestor_id(0)` is the document's own id.
    pub fn ancestor_id(&self, levels: usize) -> Option<&str> {
        let index = self
            .segments
            .len()
            .checked_sub(1 + levels.checked_mul(2)?)?;
        self.segments.get(index).map(String::as_str)
    }

    /// Number of document levels in the path.
    pub fn depth(&self) -> usize {
        self.segments.len() / 2
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl fmt::Debug for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocPath({})", self)
    }
}

impl TryFrom<String> for DocPath {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(path: DocPath) -> Self {
        path.to_string()
    }
}

/// A document returned by the remote canonical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDoc {
    /// Full document path.
    pub path: DocPath,
    /// Document fields.
    #[serde(default)]
    pub fields: Fields,
}

impl RemoteDoc {
    /// Create a document at the given path.
    pub fn new(path: DocPath, fields: Fields) -> Self {
        Self { path, fields }
    }

    /// The document id.
    pub fn id(&self) -> &str {
        self.path.id()
    }
}
