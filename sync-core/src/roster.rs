//! Conversation roster construction.
//!
//! The roster is rebuilt from scratch on every remote snapshot; there is no
//! incremental diffing. Peer display data comes from whatever profiles have
//! been resolved so far, falling back to the peer id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use sync_types::{ConversationAggregate, ConversationId, Profile, UserId};

use crate::unread::UnreadStatus;

/// One roster entry as seen by the viewing user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id.
    pub conversation_id: ConversationId,
    /// The other participant.
    pub peer_id: UserId,
    /// Peer display name, or the peer id until the lookup resolves.
    pub title: String,
    /// Peer avatar, once resolved.
    pub photo_url: Option<String>,
    /// Most recent message text.
    pub last_message: String,
    /// Most recent message time.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Most recent sender.
    pub last_sender_id: Option<UserId>,
    /// The viewer's unread counter.
    pub unread: u32,
    /// The viewer's unread status.
    pub status: UnreadStatus,
}

impl ConversationSummary {
    /// Whether the title still shows the provisional peer id.
    pub fn is_provisional(&self) -> bool {
        self.title == self.peer_id.as_str() && self.photo_url.is_none()
    }
}

/// Build the viewer's roster from a full snapshot.
///
/// Entries are de-duplicated by conversation id (the most recently active
/// copy wins) and sorted by last message time, newest first. Conversations
/// without messages sort last; ties break on conversation id.
pub fn build_roster(
    viewer: &UserId,
    snapshot: &[ConversationAggregate],
    profiles: &HashMap<UserId, Profile>,
) -> Vec<ConversationSummary> {
    let mut latest: HashMap<&ConversationId, &ConversationAggregate> = HashMap::new();
    for aggregate in snapshot.iter().filter(|a| a.has_participant(viewer)) {
        latest
            .entry(&aggregate.id)
            .and_modify(|current| {
                if aggregate.last_message_at >= current.last_message_at {
                    *current = aggregate;
                }
            })
            .or_insert(aggregate);
    }

    let mut roster: Vec<ConversationSummary> = latest
        .into_values()
        .filter_map(|aggregate| summarize(viewer, aggregate, profiles))
        .collect();
    roster.sort_by(compare_recency);
    roster
}

/// Peers in the snapshot whose profiles have not been resolved yet.
pub fn unresolved_peers(
    viewer: &UserId,
    snapshot: &[ConversationAggregate],
    profiles: &HashMap<UserId, Profile>,
) -> BTreeSet<UserId> {
    snapshot
        .iter()
        .filter_map(|aggregate| aggregate.peer_of(viewer))
        .filter(|peer| !profiles.contains_key(*peer))
        .cloned()
        .collect()
}

fn summarize(
    viewer: &UserId,
    aggregate: &ConversationAggregate,
    profiles: &HashMap<UserId, Profile>,
) -> Option<ConversationSummary> {
    let peer = aggregate.peer_of(viewer)?.clone();
    let unread = aggregate.unread_for(viewer);
    let (title, photo_url) = match profiles.get(&peer) {
        Some(profile) => (profile.display_name.clone(), profile.photo_url.clone()),
        None => (peer.to_string(), None),
    };

    Some(ConversationSummary {
        conversation_id: aggregate.id.clone(),
        peer_id: peer,
        title,
        photo_url,
        last_message: aggregate.last_message.clone(),
        last_message_at: aggregate.last_message_at,
        last_sender_id: aggregate.last_sender_id.clone(),
        unread,
        status: UnreadStatus::from_count(unread),
    })
}

fn compare_recency(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    // Option orders None first; reverse so newest (and Some) come first.
    b.last_message_at
        .cmp(&a.last_message_at)
        .then_with(|| a.conversation_id.cmp(&b.conversation_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{new_conversation, record_message};
    use chrono::Duration;

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    fn chat_at(a: &str, b: &str, minutes_ago: Option<i64>) -> ConversationAggregate {
        let agg = new_conversation(&user(a), &user(b), Utc::now()).unwrap();
        match minutes_ago {
            Some(m) => {
                record_message(agg, &user(b), "ping", Utc::now() - Duration::minutes(m)).unwrap()
            }
            None => agg,
        }
    }

    #[test]
    fn sorted_newest_first() {
        let snapshot = vec![
            chat_at("me", "old", Some(60)),
            chat_at("me", "new", Some(1)),
            chat_at("me", "mid", Some(10)),
        ];

        let roster = build_roster(&user("me"), &snapshot, &HashMap::new());
        let peers: Vec<&str> = roster.iter().map(|s| s.peer_id.as_str()).collect();
        assert_eq!(peers, vec!["new", "mid", "old"]);
    }

    #[test]
    fn never_messaged_sorts_last() {
        let snapshot = vec![chat_at("me", "quiet", None), chat_at("me", "chatty", Some(5))];

        let roster = build_roster(&user("me"), &snapshot, &HashMap::new());
        assert_eq!(roster[0].peer_id, user("chatty"));
        assert_eq!(roster[1].peer_id, user("quiet"));
    }

    #[test]
    fn duplicates_collapse_to_latest() {
        let older = chat_at("me", "bob", Some(30));
        let newer = record_message(older.clone(), &user("bob"), "again", Utc::now()).unwrap();

        let roster = build_roster(&user("me"), &[older, newer], &HashMap::new());
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].last_message, "again");
        assert_eq!(roster[0].unread, 2);
    }

    #[test]
    fn unresolved_peer_gets_provisional_title() {
        let roster = build_roster(&user("me"), &[chat_at("me", "bob", Some(1))], &HashMap::new());

        assert_eq!(roster[0].title, "bob");
        assert!(roster[0].is_provisional());
    }

    #[test]
    fn resolved_profile_supplies_title_and_photo() {
        let profiles = HashMap::from([(
            user("bob"),
            Profile {
                user_id: user("bob"),
                display_name: "Bob Builder".into(),
                photo_url: Some("https://img/bob.png".into()),
            },
        )]);

        let roster = build_roster(&user("me"), &[chat_at("me", "bob", Some(1))], &profiles);
        assert_eq!(roster[0].title, "Bob Builder");
        assert_eq!(roster[0].photo_url.as_deref(), Some("https://img/bob.png"));
        assert!(!roster[0].is_provisional());
    }

    #[test]
    fn viewer_counter_and_status() {
        let roster = build_roster(&user("me"), &[chat_at("me", "bob", Some(1))], &HashMap::new());
        assert_eq!(roster[0].unread, 1);
        assert_eq!(roster[0].status, UnreadStatus::Unread { count: 1 });
    }

    #[test]
    fn foreign_conversations_are_skipped() {
        let snapshot = vec![chat_at("x", "y", Some(1)), chat_at("me", "bob", Some(1))];
        let roster = build_roster(&user("me"), &snapshot, &HashMap::new());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn unresolved_peers_excludes_known_profiles() {
        let snapshot = vec![chat_at("me", "bob", Some(1)), chat_at("me", "amy", Some(2))];
        let profiles = HashMap::from([(
            user("amy"),
            Profile {
                user_id: user("amy"),
                display_name: "Amy".into(),
                photo_url: None,
            },
        )]);

        let pending = unresolved_peers(&user("me"), &snapshot, &profiles);
        assert_eq!(pending.into_iter().collect::<Vec<_>>(), vec![user("bob")]);
    }
}
