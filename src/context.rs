//! Interaction context and trigger classification.
//!
//! `classify` is the single decision point for whether an inbound message is
//! forwarded to the agent backend. It is a pure function over the normalized
//! event so it can be table-tested against synthetic events.

use crate::{ChannelKind, MessageEvent};
use serde::{Deserialize, Serialize};

/// Why an inbound event was (or was not) forwarded to the agent backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    DirectMessage,
    Mention,
    WatchedChannel,
    WatchedChannelThread,
    NewForumPost,
    ForumResolved,
    Unknown,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::DirectMessage => "direct_message",
            TriggerReason::Mention => "mention",
            TriggerReason::WatchedChannel => "watched_channel",
            TriggerReason::WatchedChannelThread => "watched_channel_thread",
            TriggerReason::NewForumPost => "new_forum_post",
            TriggerReason::ForumResolved => "forum_resolved",
            TriggerReason::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized view of one inbound event, built once and passed through the
/// pipeline. Also serialized (camelCase) into the wire payload for the agent
/// backend, so field names are part of the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionContext {
    pub channel_id: String,
    pub channel_name: String,
    pub channel_type: String,
    /// Empty for direct messages.
    pub guild_id: String,
    pub author_id: String,
    pub author_handle: String,
    pub message_id: String,
    pub is_thread: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_channel_id: Option<String>,
    pub trigger: TriggerReason,
}

impl InteractionContext {
    /// Build a context from a normalized message event. Total: missing
    /// optional fields become empty strings / false.
    pub fn from_message(event: &MessageEvent, trigger: TriggerReason) -> Self {
        Self {
            channel_id: event.channel_id.clone(),
            channel_name: event.channel_name.clone(),
            channel_type: event.channel_kind.as_str().to_string(),
            guild_id: event.guild_id.clone(),
            author_id: event.author_id.clone(),
            author_handle: event.author_handle.clone(),
            message_id: event.id.clone(),
            is_thread: event.is_thread,
            parent_channel_id: if event.is_thread {
                event.thread_parent_id.clone()
            } else {
                None
            },
            trigger,
        }
    }
}

/// Decide whether and why a message should be forwarded to the agent.
///
/// First match wins:
/// 1. bot author → unknown (dropped; also covers our own replies)
/// 2. direct message
/// 3. the bot is mentioned
/// 4. message in the watched channel
/// 5. message in a thread under the watched channel, unless the thread was
///    just auto-created by us (`thread_recently_created`) — its starter
///    message is handled by the thread-create path instead
pub fn classify(
    event: &MessageEvent,
    bot_user_id: &str,
    watched_channel: &str,
    thread_recently_created: bool,
) -> TriggerReason {
    if event.author_is_bot {
        return TriggerReason::Unknown;
    }

    if event.channel_kind == ChannelKind::DirectMessage {
        return TriggerReason::DirectMessage;
    }

    if !bot_user_id.is_empty() && event.mentions.iter().any(|id| id == bot_user_id) {
        return TriggerReason::Mention;
    }

    if event.channel_name == watched_channel {
        return TriggerReason::WatchedChannel;
    }

    if event.is_thread {
        if thread_recently_created {
            return TriggerReason::Unknown;
        }
        if event.thread_parent_name.as_deref() == Some(watched_channel) {
            return TriggerReason::WatchedChannelThread;
        }
    }

    TriggerReason::Unknown
}
