//! Data-state emission for Waypoint sync.
//!
//! This module provides [`DataState`], the closed set of states presentation
//! code observes, and [`SyncCycle`], a pure, side-effect-free state machine
//! that decides what to emit during one cache-first sync cycle. The machine
//! takes events as input and produces a new state plus a list of actions to
//! execute.
//!
//! The actual I/O (reading the cache, fetching the remote, merging) is
//! performed by sync-client, not by this module.

/// A discrete data state delivered to presentation code.
#[derive(Debug, Clone, PartialEq)]
pub enum DataState<T> {
    /// Nothing to show yet.
    Loading {
        /// Whether the (empty) answer came from the cache.
        is_from_cache: bool,
    },
    /// Usable data.
    Success {
        /// The entities, in store order.
        items: Vec<T>,
        /// Whether these items were read from the local cache.
        is_from_cache: bool,
        /// Whether a remote refresh is still in flight.
        is_refreshing: bool,
    },
    /// The remote refresh failed or the cache is unavailable.
    Error {
        /// Human-readable failure description.
        message: String,
        /// Stale data to keep showing, if any was cached.
        cached_items: Option<Vec<T>>,
    },
}

impl<T> DataState<T> {
    /// Initial state when the cache is empty.
    pub fn loading() -> Self {
        Self::Loading {
            is_from_cache: false,
        }
    }

    /// Cache-derived state shown while the remote fetch runs.
    pub fn cached(items: Vec<T>) -> Self {
        Self::Success {
            items,
            is_from_cache: true,
            is_refreshing: true,
        }
    }

    /// Error carrying the cached snapshot; an empty snapshot becomes `None`.
    pub fn failed(message: impl Into<String>, cached: Vec<T>) -> Self {
        Self::Error {
            message: message.into(),
            cached_items: if cached.is_empty() { None } else { Some(cached) },
        }
    }

    /// True for states that a running refresh will supersede.
    pub fn is_interim(&self) -> bool {
        matches!(
            self,
            Self::Loading { .. }
                | Self::Success {
                    is_refreshing: true,
                    ..
                }
        )
    }

    /// True for the `Error` variant.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Items to display: success items, or the stale cached items of an error.
    pub fn items(&self) -> Option<&[T]> {
        match self {
            Self::Loading { .. } => None,
            Self::Success { items, .. } => Some(items),
            Self::Error { cached_items, .. } => cached_items.as_deref(),
        }
    }

    /// Convert items, dropping those for which `f` returns `None`.
    pub fn filter_map<U>(self, mut f: impl FnMut(T) -> Option<U>) -> DataState<U> {
        match self {
            Self::Loading { is_from_cache } => DataState::Loading { is_from_cache },
            Self::Success {
                items,
                is_from_cache,
                is_refreshing,
            } => DataState::Success {
                items: items.into_iter().filter_map(&mut f).collect(),
                is_from_cache,
                is_refreshing,
            },
            Self::Error {
                message,
                cached_items,
            } => DataState::Error {
                message,
                cached_items: cached_items.map(|items| items.into_iter().filter_map(f).collect()),
            },
        }
    }

    /// Convert every item.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> DataState<U> {
        self.filter_map(|item| Some(f(item)))
    }
}

/// How the remote leg of a cycle ended, remembered while the cache reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Non-empty answer, merged into the cache.
    Fresh,
    /// Empty answer, ignored by the empty-result guard.
    Guarded,
    /// The remote fetch failed.
    Failed {
        /// Failure description.
        message: String,
    },
}

/// Sync cycle state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCycle {
    /// Nothing has happened yet.
    Start,
    /// The remote fetch has been requested.
    AwaitingRemote,
    /// The remote leg finished; the cache is being re-read.
    Reloading {
        /// How the remote leg ended.
        outcome: Outcome,
    },
    /// A terminal state was emitted. A refresh may start a new cycle.
    Settled,
}

impl SyncCycle {
    /// Create a new machine in the Start state.
    pub fn new() -> Self {
        Self::Start
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event<T>(self, event: Event<T>) -> (Self, Vec<Action<T>>) {
        match (self, event) {
            // From Start
            (Self::Start, Event::CacheRead { records }) => {
                let first = if records.is_empty() {
                    DataState::loading()
                } else {
                    DataState::cached(records)
                };
                (
                    Self::AwaitingRemote,
                    vec![Action::Emit(first), Action::FetchRemote],
                )
            }
            (Self::Start | Self::Settled, Event::RefreshRequested) => {
                (Self::AwaitingRemote, vec![Action::FetchRemote])
            }

            // From AwaitingRemote
            (Self::AwaitingRemote, Event::RemoteFetched { records }) => {
                if records.is_empty() {
                    (
                        Self::Reloading {
                            outcome: Outcome::Guarded,
                        },
                        vec![Action::ReloadCache],
                    )
                } else {
                    (
                        Self::Reloading {
                            outcome: Outcome::Fresh,
                        },
                        vec![Action::WriteCache { records }, Action::ReloadCache],
                    )
                }
            }
            (Self::AwaitingRemote, Event::RemoteFailed { message }) => (
                Self::Reloading {
                    outcome: Outcome::Failed { message },
                },
                vec![Action::ReloadCache],
            ),

            // From Reloading
            (Self::Reloading { outcome }, Event::CacheReloaded { records }) => {
                let state = match outcome {
                    Outcome::Fresh => DataState::Success {
                        items: records,
                        is_from_cache: false,
                        is_refreshing: false,
                    },
                    Outcome::Guarded => DataState::Success {
                        items: records,
                        is_from_cache: true,
                        is_refreshing: false,
                    },
                    Outcome::Failed { message } => DataState::failed(message, records),
                };
                (Self::Settled, vec![Action::Emit(state)])
            }

            // Cache failures are fatal to the cycle, from any live state
            (
                Self::Start | Self::AwaitingRemote | Self::Reloading { .. },
                Event::CacheFailed { message },
            ) => (
                Self::Settled,
                vec![Action::Emit(DataState::Error {
                    message,
                    cached_items: None,
                })],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the cycle has emitted its terminal state.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled)
    }
}

impl Default for SyncCycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Events fed into the sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
    /// Initial cache read completed.
    CacheRead {
        /// Records currently cached for the scope.
        records: Vec<T>,
    },
    /// A caller asked for a fresh remote fetch.
    RefreshRequested,
    /// Remote fetch succeeded.
    RemoteFetched {
        /// Records mapped from the remote answer.
        records: Vec<T>,
    },
    /// Remote fetch failed.
    RemoteFailed {
        /// Failure description.
        message: String,
    },
    /// Cache re-read after the remote leg.
    CacheReloaded {
        /// Records currently cached for the scope.
        records: Vec<T>,
    },
    /// A cache read or write failed.
    CacheFailed {
        /// Failure description.
        message: String,
    },
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq)]
pub enum Action<T> {
    /// Deliver a state to the subscriber.
    Emit(DataState<T>),
    /// Issue the remote fetch for the scope.
    FetchRemote,
    /// Merge records into the cache.
    WriteCache {
        /// Records to merge.
        records: Vec<T>,
    },
    /// Re-read the cache for the scope.
    ReloadCache,
}
