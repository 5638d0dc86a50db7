//! # sync-types
//!
//! Data model types for the Waypoint offline-first sync engine.
//!
//! This crate provides the foundational types used across all Waypoint crates:
//! - [`EntityKind`], [`CacheRecord`] - Locally cached entities
//! - [`DocPath`], [`RemoteDoc`] - Documents in the remote canonical store
//! - [`UserId`], [`ConversationId`], [`MessageId`] - Identity types
//! - [`ConversationAggregate`], [`Message`], [`Profile`] - Conversation documents
//! - [`ModelError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod conversation;
mod document;
mod entity;
mod error;
mod ids;

pub use conversation::{ConversationAggregate, Message, Profile};
pub use document::{DocPath, RemoteDoc};
pub use entity::{CacheRecord, EntityKind, Fields};
pub use error::ModelError;
pub use ids::{ConversationId, MessageId, UserId};
