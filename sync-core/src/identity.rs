//! Conversation identity derivation.
//!
//! Both participants must address the same aggregate without coordinating,
//! so the id is a pure function of the unordered participant pair.

use sync_types::{ConversationId, UserId};

/// Separator placed between the two sorted participant ids.
///
/// Participant ids containing this character can collide; callers must not
/// use such ids.
pub const CONVERSATION_ID_DELIMITER: char = '_';

/// Derive the conversation id for a participant pair.
///
/// `conversation_id(a, b) == conversation_id(b, a)` for all inputs.
pub fn conversation_id(a: &UserId, b: &UserId) -> ConversationId {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    ConversationId::from_raw(format!(
        "{}{}{}",
        first, CONVERSATION_ID_DELIMITER, second
    ))
}

/// Sorted participant list for a pair, matching the id's ordering.
pub fn participants(a: &UserId, b: &UserId) -> Vec<UserId> {
    let mut pair = vec![a.clone(), b.clone()];
    pair.sort();
    pair
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alice_and_bob() {
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        assert_eq!(conversation_id(&alice, &bob).as_str(), "alice_bob");
        assert_eq!(conversation_id(&bob, &alice).as_str(), "alice_bob");
    }

    #[test]
    fn commutative_for_many_pairs() {
        let ids = ["u1", "u2", "Zoe", "amy", "9x", "longer-user-id"];
        for a in ids {
            for b in ids {
                let a = UserId::from(a);
                let b = UserId::from(b);
                assert_eq!(conversation_id(&a, &b), conversation_id(&b, &a));
            }
        }
    }

    #[test]
    fn distinct_pairs_get_distinct_ids() {
        let a = UserId::from("a");
        let b = UserId::from("b");
        let c = UserId::from("c");

        assert_ne!(conversation_id(&a, &b), conversation_id(&a, &c));
        assert_ne!(conversation_id(&a, &b), conversation_id(&b, &c));
    }

    #[test]
    fn participants_are_sorted() {
        let list = participants(&UserId::from("zed"), &UserId::from("amy"));
        assert_eq!(list, vec![UserId::from("amy"), UserId::from("zed")]);
    }
}
