//! Session key resolution.
//!
//! The agent backend keeps conversation history per session id, so the key
//! choice is the routing policy: DMs and plain channel messages get a
//! personal per-user history, threads are collaborative and share one
//! history across participants.

use crate::context::{InteractionContext, TriggerReason};

/// Map a context to its conversation session key. Pure and total.
///
/// - DM → `dm:{authorId}`
/// - thread → `thread:{channelId}`
/// - anything else → `channel:{authorId}`
pub fn session_key(ctx: &InteractionContext) -> String {
    if ctx.trigger == TriggerReason::DirectMessage {
        return format!("dm:{}", ctx.author_id);
    }

    if ctx.is_thread {
        return format!("thread:{}", ctx.channel_id);
    }

    format!("channel:{}", ctx.author_id)
}
