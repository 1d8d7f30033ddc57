//! Reply delivery back to Discord.
//!
//! DMs and thread messages are answered in place. A plain channel message
//! spawns a discussion thread named from the message text and the reply goes
//! there, falling back to a direct reply if thread creation fails. All text
//! is clipped to the transport's message-size limit first.

use crate::error::DeliveryError;
use crate::{MessageEvent, ThreadMessage};
use std::sync::Arc;

/// Discord's message length limit.
pub const MESSAGE_LIMIT: usize = 2000;
/// How much of the source message seeds a spawned thread's name.
const THREAD_NAME_SEED: usize = 50;

/// Outbound (and thread-readback) operations on the chat transport.
/// Implemented by the serenity adapter; tests use an in-memory fake.
pub trait ChatTransport: Send + Sync {
    /// Reply to a specific message in its channel.
    fn reply(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Send a plain message to a channel or thread.
    fn send(
        &self,
        channel_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Create a thread from a message; returns the new thread's id.
    fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<String, DeliveryError>> + Send;

    /// Fetch a thread's starter message, if it exists yet.
    fn fetch_starter_message(
        &self,
        thread_id: &str,
    ) -> impl Future<Output = Result<Option<ThreadMessage>, DeliveryError>> + Send;

    /// Fetch up to `limit` recent messages from a channel. Ordering is
    /// transport-defined; callers needing chronological order must sort.
    fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> impl Future<Output = Result<Vec<ThreadMessage>, DeliveryError>> + Send;
}

/// Clip `text` to the transport limit, marking the cut with `...`.
/// Idempotent: clipping an already-clipped string changes nothing.
pub fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= MESSAGE_LIMIT {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MESSAGE_LIMIT - 3).collect();
    clipped.push_str("...");
    clipped
}

/// Derive a thread name from the source message text.
pub fn thread_name_from(content: &str) -> String {
    let seed: String = content.chars().take(THREAD_NAME_SEED).collect();
    if seed.is_empty() {
        return "💬 Help".to_string();
    }
    let suffix = if content.chars().count() >= THREAD_NAME_SEED {
        "..."
    } else {
        ""
    };
    format!("💬 {seed}{suffix}")
}

/// Delivers agent replies to their source.
pub struct ResponseDispatcher<T> {
    transport: Arc<T>,
}

impl<T: ChatTransport> ResponseDispatcher<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Deliver `text` as the answer to `source`. Failures are logged, never
    /// surfaced to the user; the one fallback is thread-create → plain reply.
    pub async fn deliver(&self, source: &MessageEvent, text: &str) {
        let text = truncate_reply(text);

        // DM or existing thread: answer in place.
        if source.channel_kind == crate::ChannelKind::DirectMessage || source.is_thread {
            if let Err(error) = self
                .transport
                .reply(&source.channel_id, &source.id, &text)
                .await
            {
                tracing::error!(channel_id = %source.channel_id, %error, "failed to deliver reply");
            }
            return;
        }

        // Plain channel message: spawn a discussion thread for the answer.
        let name = thread_name_from(&source.content);
        match self
            .transport
            .create_thread(&source.channel_id, &source.id, &name)
            .await
        {
            Ok(thread_id) => {
                if let Err(error) = self.transport.send(&thread_id, &text).await {
                    tracing::error!(thread_id, %error, "failed to deliver reply into spawned thread");
                }
            }
            Err(error) => {
                tracing::debug!(channel_id = %source.channel_id, %error, "thread creation failed, replying in channel");
                if let Err(error) = self
                    .transport
                    .reply(&source.channel_id, &source.id, &text)
                    .await
                {
                    tracing::error!(channel_id = %source.channel_id, %error, "failed to deliver fallback reply");
                }
            }
        }
    }

    /// Post `text` into a thread (lifecycle replies: forum posts, resolved
    /// summaries). Failures are logged and swallowed.
    pub async fn post_to_thread(&self, thread_id: &str, text: &str) {
        let text = truncate_reply(text);
        if let Err(error) = self.transport.send(thread_id, &text).await {
            tracing::error!(thread_id, %error, "failed to post to thread");
        }
    }
}
