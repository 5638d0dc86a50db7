//! Mapping between remote documents, cache records and typed entities.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sync_types::{CacheRecord, EntityKind, ModelError, RemoteDoc, UserId};

use crate::CoreError;

/// Turn a remote document into a cache record.
///
/// Owner and parent ids are denormalized from the document path (one and
/// two document levels up for entities below a city) so they survive in the
/// cache for offline, parent-scoped queries.
pub fn record_from_doc(
    kind: EntityKind,
    doc: &RemoteDoc,
    fetched_at: DateTime<Utc>,
) -> Result<CacheRecord, CoreError> {
    if doc.path.collection() != kind.collection() {
        return Err(CoreError::Mapping {
            kind,
            id: doc.id().to_string(),
            reason: format!("document lives in '{}'", doc.path.collection()),
        });
    }

    let owner = ancestor(doc, kind.owner_depth())?;
    let parent_id = kind
        .parent_depth()
        .map(|levels| ancestor(doc, levels).map(str::to_string))
        .transpose()?;

    Ok(CacheRecord {
        id: doc.id().to_string(),
        kind,
        owner_id: UserId::new(owner),
        parent_id,
        fields: doc.fields.clone(),
        last_updated: fetched_at,
    })
}

fn ancestor(doc: &RemoteDoc, levels: usize) -> Result<&str, ModelError> {
    doc.path
        .ancestor_id(levels)
        .ok_or_else(|| ModelError::MissingAncestor {
            path: doc.path.to_string(),
            levels,
        })
}

/// A typed view over a cached record of one entity kind.
pub trait Entity: Sized {
    /// The kind whose records this type maps.
    const KIND: EntityKind;

    /// Build the typed entity from a cached record.
    fn from_record(record: &CacheRecord) -> Result<Self, CoreError>;
}

fn payload<P: DeserializeOwned>(record: &CacheRecord) -> Result<P, CoreError> {
    serde_json::from_value(serde_json::Value::Object(record.fields.clone())).map_err(|e| {
        CoreError::Mapping {
            kind: record.kind,
            id: record.id.clone(),
            reason: e.to_string(),
        }
    })
}

fn check_kind(record: &CacheRecord, expected: EntityKind) -> Result<(), CoreError> {
    if record.kind == expected {
        Ok(())
    } else {
        Err(CoreError::Mapping {
            kind: expected,
            id: record.id.clone(),
            reason: format!("record is a {}", record.kind),
        })
    }
}

fn required_parent(record: &CacheRecord) -> Result<String, CoreError> {
    record.parent_id.clone().ok_or_else(|| CoreError::Mapping {
        kind: record.kind,
        id: record.id.clone(),
        reason: "missing parent city".into(),
    })
}

/// A city an owner has visited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    /// City id.
    pub id: String,
    /// Owning user.
    pub owner_id: UserId,
    /// Display name.
    pub name: String,
    /// Country, if recorded.
    pub country: Option<String>,
    /// Last refresh from the remote.
    pub last_updated: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CityPayload {
    name: String,
    #[serde(default)]
    country: Option<String>,
}

impl Entity for City {
    const KIND: EntityKind = EntityKind::City;

    fn from_record(record: &CacheRecord) -> Result<Self, CoreError> {
        check_kind(record, Self::KIND)?;
        let p: CityPayload = payload(record)?;
        Ok(Self {
            id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            name: p.name,
            country: p.country,
            last_updated: record.last_updated,
        })
    }
}

/// A saved place inside a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Location id.
    pub id: String,
    /// Owning user.
    pub owner_id: UserId,
    /// City the location belongs to.
    pub city_id: String,
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: Option<String>,
    /// Latitude in degrees.
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    pub longitude: Option<f64>,
    /// Free-form notes.
    pub description: Option<String>,
    /// Last refresh from the remote.
    pub last_updated: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationPayload {
    name: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

impl Entity for Location {
    const KIND: EntityKind = EntityKind::Location;

    fn from_record(record: &CacheRecord) -> Result<Self, CoreError> {
        check_kind(record, Self::KIND)?;
        let p: LocationPayload = payload(record)?;
        Ok(Self {
            id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            city_id: required_parent(record)?,
            name: p.name,
            address: p.address,
            latitude: p.latitude,
            longitude: p.longitude,
            description: p.description,
            last_updated: record.last_updated,
        })
    }
}

/// A review written inside a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Review id.
    pub id: String,
    /// Author.
    pub owner_id: UserId,
    /// City the review belongs to.
    pub city_id: String,
    /// Reviewed location, if any.
    pub location_id: Option<String>,
    /// Rating from 1 to 5.
    pub rating: u8,
    /// Review body.
    pub text: String,
    /// Last refresh from the remote.
    pub last_updated: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewPayload {
    #[serde(default)]
    location_id: Option<String>,
    rating: u8,
    #[serde(default)]
    text: String,
}

impl Entity for Review {
    const KIND: EntityKind = EntityKind::Review;

    fn from_record(record: &CacheRecord) -> Result<Self, CoreError> {
        check_kind(record, Self::KIND)?;
        let p: ReviewPayload = payload(record)?;
        if !(1..=5).contains(&p.rating) {
            return Err(CoreError::Mapping {
                kind: Self::KIND,
                id: record.id.clone(),
                reason: format!("rating {} out of range", p.rating),
            });
        }
        Ok(Self {
            id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            city_id: required_parent(record)?,
            location_id: p.location_id,
            rating: p.rating,
            text: p.text,
            last_updated: record.last_updated,
        })
    }
}
