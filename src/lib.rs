//! Askbot: a Discord community-assistant bot that routes inbound events to a
//! hosted agent backend and delivers the generated replies.
//!
//! The pipeline per inbound event: build an [`context::InteractionContext`],
//! classify the trigger, rate-limit direct messages, record usage analytics,
//! resolve a session key, forward to the agent backend with bounded retry,
//! and dispatch the reply back to Discord.

pub mod analytics;
pub mod config;
pub mod context;
pub mod db;
pub mod discord;
pub mod dispatch;
pub mod duration;
pub mod gateway;
pub mod orchestrator;
pub mod ratelimit;
pub mod session;

pub mod error;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Kind of channel an inbound message arrived on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelKind {
    DirectMessage,
    Text,
    Thread,
    Forum,
    Other,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::DirectMessage => "DM",
            ChannelKind::Text => "GuildText",
            ChannelKind::Thread => "PublicThread",
            ChannelKind::Forum => "GuildForum",
            ChannelKind::Other => "Other",
        }
    }
}

/// Normalized inbound chat message, decoupled from the transport library so
/// the classification pipeline is testable against synthetic events.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub id: String,
    pub content: String,
    pub author_id: String,
    pub author_handle: String,
    pub author_is_bot: bool,
    pub channel_id: String,
    pub channel_name: String,
    pub channel_kind: ChannelKind,
    pub guild_id: String,
    /// User ids mentioned in the message.
    pub mentions: Vec<String>,
    pub is_thread: bool,
    pub thread_parent_id: Option<String>,
    pub thread_parent_name: Option<String>,
}

/// A thread was created (forum post or spawned discussion thread).
#[derive(Debug, Clone)]
pub struct ThreadCreateEvent {
    pub thread_id: String,
    pub thread_name: String,
    pub guild_id: String,
    pub parent_channel_id: Option<String>,
    pub parent_is_forum: bool,
}

/// A thread's applied-tag list changed.
#[derive(Debug, Clone)]
pub struct ThreadTagsEvent {
    pub thread_id: String,
    pub thread_name: String,
    pub guild_id: String,
    pub previous_tags: Vec<String>,
    pub current_tags: Vec<String>,
    pub available_tags: Vec<TagInfo>,
    pub parent_is_forum: bool,
}

/// A tag defined on a forum channel.
#[derive(Debug, Clone)]
pub struct TagInfo {
    pub id: String,
    pub name: String,
}

impl ThreadTagsEvent {
    fn has_tag(&self, tags: &[String], tag_name: &str) -> bool {
        self.available_tags
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(tag_name))
            .is_some_and(|t| tags.iter().any(|id| id == &t.id))
    }

    /// True when the tag named `tag_name` transitioned from absent to applied.
    pub fn tag_newly_applied(&self, tag_name: &str) -> bool {
        !self.has_tag(&self.previous_tags, tag_name) && self.has_tag(&self.current_tags, tag_name)
    }
}

/// A member joined the guild.
#[derive(Debug, Clone)]
pub struct MemberJoinEvent {
    pub user_id: String,
    pub guild_id: String,
    pub username: String,
}

/// A message fetched back out of a thread (for resolved-post transcripts).
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub id: String,
    pub author_id: String,
    pub author_handle: String,
    pub content: String,
    pub timestamp_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags_event(previous: &[&str], current: &[&str]) -> ThreadTagsEvent {
        ThreadTagsEvent {
            thread_id: "t1".into(),
            thread_name: "how do I deploy".into(),
            guild_id: "g1".into(),
            previous_tags: previous.iter().map(|s| s.to_string()).collect(),
            current_tags: current.iter().map(|s| s.to_string()).collect(),
            available_tags: vec![
                TagInfo { id: "100".into(), name: "Resolved".into() },
                TagInfo { id: "200".into(), name: "Urgent".into() },
            ],
            parent_is_forum: true,
        }
    }

    #[test]
    fn test_tag_newly_applied_detects_transition() {
        assert!(tags_event(&[], &["100"]).tag_newly_applied("Resolved"));
        assert!(tags_event(&["200"], &["200", "100"]).tag_newly_applied("resolved"));
    }

    #[test]
    fn test_tag_newly_applied_ignores_steady_state() {
        assert!(!tags_event(&["100"], &["100"]).tag_newly_applied("Resolved"));
        assert!(!tags_event(&[], &["200"]).tag_newly_applied("Resolved"));
        assert!(!tags_event(&["100"], &[]).tag_newly_applied("Resolved"));
    }

    #[test]
    fn test_tag_newly_applied_unknown_tag_name() {
        assert!(!tags_event(&[], &["100"]).tag_newly_applied("Answered"));
    }
}
