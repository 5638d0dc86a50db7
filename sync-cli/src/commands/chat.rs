//! Conversation commands.

use anyhow::Result;
use futures_util::StreamExt;
use std::time::Duration;
use sync_core::{conversation_id, ConversationSummary};
use sync_types::{ConversationId, UserId};

use crate::session::Session;

/// How long `list` waits for profile lookups to settle.
const ROSTER_SETTLE: Duration = Duration::from_millis(200);

/// Print the conversation id for a pair of users.
pub fn id(a: &str, b: &str) {
    println!("{}", conversation_id(&UserId::from(a), &UserId::from(b)));
}

/// Open (creating if needed) the conversation between `user` and `peer`.
pub async fn open(session: &Session, user: &str, peer: &str) -> Result<()> {
    let id = session
        .conversations()
        .ensure_conversation(&UserId::from(user), &UserId::from(peer))
        .await?;
    session.save_remote().await?;
    println!("{}", id);
    Ok(())
}

/// Send a message.
pub async fn send(session: &Session, conversation: &str, sender: &str, text: &str) -> Result<()> {
    let result = session
        .conversations()
        .send_message(
            &ConversationId::from_raw(conversation),
            &UserId::from(sender),
            text,
        )
        .await;
    // A failed counter update still leaves the message in the log.
    session.save_remote().await?;

    let message = result?;
    println!("Sent {}", message.id);
    Ok(())
}

/// Print a conversation's messages, oldest first.
pub async fn messages(session: &Session, conversation: &str) -> Result<()> {
    let messages = session
        .conversations()
        .messages(&ConversationId::from_raw(conversation))
        .await?;

    if messages.is_empty() {
        println!("(no messages)");
    }
    for message in messages {
        println!(
            "[{}] {}: {}",
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
            message.sender_id,
            message.text
        );
    }
    Ok(())
}

/// Print `user`'s roster once profile lookups have settled.
pub async fn list(session: &Session, user: &str) -> Result<()> {
    let mut roster = session.conversations().listen(&UserId::from(user)).await?;

    let mut latest = roster.next().await.unwrap_or_default();
    while let Ok(Some(next)) = tokio::time::timeout(ROSTER_SETTLE, roster.next()).await {
        latest = next;
    }

    if latest.is_empty() {
        println!("(no conversations)");
    }
    for summary in &latest {
        println!("{}", format_summary(summary));
    }
    Ok(())
}

fn format_summary(summary: &ConversationSummary) -> String {
    let badge = if summary.status.is_unread() {
        format!(" [{} unread]", summary.unread)
    } else {
        String::new()
    };
    let last = if summary.last_message.is_empty() {
        "(no messages)"
    } else {
        summary.last_message.as_str()
    };
    format!(
        "{}  {}{}  {}",
        summary.conversation_id, summary.title, badge, last
    )
}
