//! # sync-core
//!
//! Pure logic for Waypoint sync (no I/O, instant tests).
//!
//! This crate implements the sync-cycle state machine, conversation
//! aggregate transitions and roster construction without any network or
//! disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`SyncCycle`] decides what a subscriber sees and which I/O runs next
//! - [`aggregate`] computes the next conversation document from the current one
//! - [`build_roster`] turns a snapshot into the viewer's sorted roster
//!
//! The actual I/O (cache, remote store) is performed by `sync-client`, which
//! interprets the actions produced by these functions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
mod error;
pub mod identity;
pub mod mapping;
pub mod roster;
pub mod state;
pub mod unread;

pub use error::CoreError;
pub use identity::{conversation_id, participants, CONVERSATION_ID_DELIMITER};
pub use mapping::{record_from_doc, City, Entity, Location, Review};
pub use roster::{build_roster, unresolved_peers, ConversationSummary};
pub use state::{Action, DataState, Event, Outcome, SyncCycle};
pub use unread::UnreadStatus;
