//! Entity kinds and the cached record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ModelError, UserId};

/// Payload field map shared by cache records and remote documents.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// The entity kinds that are synchronized between cache and remote.
///
/// Remote layout is `users/{owner}/cities/{city}` for cities and
/// `users/{owner}/cities/{city}/{collection}/{id}` for everything below a
/// city.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A city an owner has visited.
    City,
    /// A saved place inside a city.
    Location,
    /// A review written inside a city.
    Review,
}

impl EntityKind {
    /// Every kind, in cache-table creation order.
    pub const ALL: [EntityKind; 3] = [EntityKind::City, EntityKind::Location, EntityKind::Review];

    /// Local cache table name.
    pub fn table(&self) -> &'static str {
        self.collection()
    }

    /// Remote collection name (also the collection-group name).
    pub fn collection(&self) -> &'static str {
        match self {
            Self::City => "cities",
            Self::Location => "locations",
            Self::Review => "reviews",
        }
    }

    /// Document levels between an entity and its parent, if it has one.
    pub fn parent_depth(&self) -> Option<usize> {
        match self {
            Self::City => None,
            Self::Location | Self::Review => Some(1),
        }
    }

    /// Document levels between an entity and its owning user.
    pub fn owner_depth(&self) -> usize {
        match self {
            Self::City => 1,
            Self::Location | Self::Review => 2,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for EntityKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "city" | "cities" => Ok(Self::City),
            "location" | "locations" => Ok(Self::Location),
            "review" | "reviews" => Ok(Self::Review),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

/// One cached entity instance.
///
/// `parent_id` is denormalized from the remote document path so parent-scoped
/// cache queries keep working without the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Entity id (the remote document id).
    pub id: String,
    /// Which table this record lives in.
    pub kind: EntityKind,
    /// Owning user.
    pub owner_id: UserId,
    /// Parent entity id (the city for locations and reviews).
    pub parent_id: Option<String>,
    /// Entity payload.
    pub fields: Fields,
    /// When this record was last produced from the remote store.
    pub last_updated: DateTime<Utc>,
}

impl CacheRecord {
    /// Create an empty record stamped with the current time.
    pub fn new(kind: EntityKind, id: impl Into<String>, owner_id: UserId) -> Self {
        Self {
            id: id.into(),
            kind,
            owner_id,
            parent_id: None,
            fields: Fields::new(),
            last_updated: Utc::now(),
        }
    }

    /// Set the parent id.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set a single payload field.
    pub fn with_field(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Read a string field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}
