//! Discord gateway adapter (serenity).
//!
//! Translates serenity events into the normalized event types the
//! orchestrator consumes, and implements [`ChatTransport`] over the Discord
//! REST API. All classification and routing decisions live in the
//! orchestrator; this module only normalizes and sends.

use crate::config::Config;
use crate::dispatch::ChatTransport;
use crate::error::DeliveryError;
use crate::gateway::HttpBackend;
use crate::orchestrator::Orchestrator;
use crate::ratelimit::SqliteRateLimitStore;
use crate::{
    ChannelKind, MemberJoinEvent, MessageEvent, TagInfo, ThreadCreateEvent, ThreadMessage,
    ThreadTagsEvent,
};
use serenity::all::{
    AutoArchiveDuration, Channel, ChannelId, ChannelType, Context, CreateMessage, CreateThread,
    EventHandler, GatewayIntents, GetMessages, GuildChannel, Member, Message, MessageId, Ready,
};
use serenity::async_trait;
use serenity::http::Http;
use std::sync::Arc;

/// The orchestrator as wired for production.
pub type BotOrchestrator = Orchestrator<SerenityTransport, HttpBackend, SqliteRateLimitStore>;

/// Gateway intents the bot needs: guild + DM messages with content, member
/// joins, and thread lifecycle events (covered by GUILDS).
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::DIRECT_MESSAGES
}

fn channel_kind(kind: ChannelType) -> ChannelKind {
    match kind {
        ChannelType::Private => ChannelKind::DirectMessage,
        ChannelType::Text | ChannelType::News => ChannelKind::Text,
        ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread => {
            ChannelKind::Thread
        }
        ChannelType::Forum => ChannelKind::Forum,
        _ => ChannelKind::Other,
    }
}

/// Outbound REST operations used by the dispatcher and the lifecycle
/// handlers.
pub struct SerenityTransport {
    http: Arc<Http>,
}

impl SerenityTransport {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn channel(&self, channel_id: &str) -> Result<ChannelId, DeliveryError> {
        channel_id
            .parse::<u64>()
            .map(ChannelId::new)
            .map_err(|_| DeliveryError::Send {
                channel_id: channel_id.to_string(),
                reason: "channel id is not numeric".into(),
            })
    }
}

impl ChatTransport for SerenityTransport {
    async fn reply(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let channel = self.channel(channel_id)?;
        let message_id = message_id.parse::<u64>().map_err(|_| DeliveryError::Send {
            channel_id: channel_id.to_string(),
            reason: "message id is not numeric".into(),
        })?;

        channel
            .send_message(
                &self.http,
                CreateMessage::new()
                    .content(text)
                    .reference_message((channel, MessageId::new(message_id))),
            )
            .await
            .map_err(|error| DeliveryError::Send {
                channel_id: channel_id.to_string(),
                reason: error.to_string(),
            })?;

        Ok(())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<(), DeliveryError> {
        let channel = self.channel(channel_id)?;
        channel
            .say(&self.http, text)
            .await
            .map_err(|error| DeliveryError::Send {
                channel_id: channel_id.to_string(),
                reason: error.to_string(),
            })?;
        Ok(())
    }

    async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String, DeliveryError> {
        let channel = self.channel(channel_id)?;
        let message_id = message_id
            .parse::<u64>()
            .map_err(|_| DeliveryError::ThreadCreate {
                channel_id: channel_id.to_string(),
                reason: "message id is not numeric".into(),
            })?;

        let thread = channel
            .create_thread_from_message(
                &self.http,
                MessageId::new(message_id),
                CreateThread::new(name).auto_archive_duration(AutoArchiveDuration::OneHour),
            )
            .await
            .map_err(|error| DeliveryError::ThreadCreate {
                channel_id: channel_id.to_string(),
                reason: error.to_string(),
            })?;

        Ok(thread.id.to_string())
    }

    async fn fetch_starter_message(
        &self,
        thread_id: &str,
    ) -> Result<Option<ThreadMessage>, DeliveryError> {
        let channel = self.channel(thread_id)?;
        // A thread's starter message shares the thread's own id.
        let starter_id = channel.get();

        match channel.message(&self.http, MessageId::new(starter_id)).await {
            Ok(message) => Ok(Some(ThreadMessage {
                id: message.id.to_string(),
                author_id: message.author.id.to_string(),
                author_handle: message.author.tag(),
                content: message.content.clone(),
                timestamp_ms: message.timestamp.timestamp_millis(),
            })),
            Err(error) => {
                tracing::debug!(thread_id, %error, "starter message not available");
                Ok(None)
            }
        }
    }

    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> Result<Vec<ThreadMessage>, DeliveryError> {
        let channel = self.channel(channel_id)?;
        let messages = channel
            .messages(&self.http, GetMessages::new().limit(limit))
            .await
            .map_err(|error| DeliveryError::Fetch {
                channel_id: channel_id.to_string(),
                reason: error.to_string(),
            })?;

        Ok(messages
            .iter()
            .map(|message| ThreadMessage {
                id: message.id.to_string(),
                author_id: message.author.id.to_string(),
                author_handle: message.author.tag(),
                content: message.content.clone(),
                timestamp_ms: message.timestamp.timestamp_millis(),
            })
            .collect())
    }
}

/// Serenity event handler: one normalization + orchestrator call per event,
/// spawned so slow pipelines never block the gateway dispatch loop.
pub struct Handler {
    orchestrator: Arc<BotOrchestrator>,
    config: Arc<Config>,
}

impl Handler {
    pub fn new(orchestrator: Arc<BotOrchestrator>, config: Arc<Config>) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Resolve a guild channel, preferring the cache over REST.
    async fn guild_channel(ctx: &Context, channel_id: ChannelId) -> Option<GuildChannel> {
        match channel_id.to_channel(ctx).await {
            Ok(Channel::Guild(channel)) => Some(channel),
            Ok(_) => None,
            Err(error) => {
                tracing::debug!(%channel_id, %error, "failed to resolve channel");
                None
            }
        }
    }

    async fn normalize_message(ctx: &Context, msg: &Message) -> MessageEvent {
        let mut channel_name = String::new();
        let mut kind = ChannelKind::Other;
        let mut is_thread = false;
        let mut thread_parent_id = None;
        let mut thread_parent_name = None;

        if msg.guild_id.is_none() {
            kind = ChannelKind::DirectMessage;
        } else if let Some(channel) = Self::guild_channel(ctx, msg.channel_id).await {
            channel_name = channel.name.clone();
            kind = channel_kind(channel.kind);
            is_thread = channel.thread_metadata.is_some();

            if is_thread && let Some(parent_id) = channel.parent_id {
                thread_parent_id = Some(parent_id.to_string());
                thread_parent_name = Self::guild_channel(ctx, parent_id)
                    .await
                    .map(|parent| parent.name.clone());
            }
        }

        MessageEvent {
            id: msg.id.to_string(),
            content: msg.content.clone(),
            author_id: msg.author.id.to_string(),
            author_handle: msg.author.tag(),
            author_is_bot: msg.author.bot,
            channel_id: msg.channel_id.to_string(),
            channel_name,
            channel_kind: kind,
            guild_id: msg.guild_id.map(|id| id.to_string()).unwrap_or_default(),
            mentions: msg.mentions.iter().map(|user| user.id.to_string()).collect(),
            is_thread,
            thread_parent_id,
            thread_parent_name,
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.orchestrator.set_bot_user_id(ready.user.id.to_string());
        tracing::info!(
            bot = %ready.user.name,
            watched_channel = %self.config.watched_channel,
            "bot online, monitoring DMs, mentions, watched channel, and forums"
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let event = Self::normalize_message(&ctx, &msg).await;
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.handle_message(event).await;
        });
    }

    async fn thread_create(&self, ctx: Context, thread: GuildChannel) {
        let parent_is_forum = match thread.parent_id {
            Some(parent_id) => Self::guild_channel(&ctx, parent_id)
                .await
                .is_some_and(|parent| parent.kind == ChannelType::Forum),
            None => false,
        };

        let event = ThreadCreateEvent {
            thread_id: thread.id.to_string(),
            thread_name: thread.name.clone(),
            guild_id: thread.guild_id.to_string(),
            parent_channel_id: thread.parent_id.map(|id| id.to_string()),
            parent_is_forum,
        };

        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.handle_thread_create(event).await;
        });
    }

    async fn thread_update(&self, ctx: Context, old: Option<GuildChannel>, new: GuildChannel) {
        let Some(parent_id) = new.parent_id else {
            return;
        };
        let Some(parent) = Self::guild_channel(&ctx, parent_id).await else {
            return;
        };
        if parent.kind != ChannelType::Forum {
            return;
        }

        let event = ThreadTagsEvent {
            thread_id: new.id.to_string(),
            thread_name: new.name.clone(),
            guild_id: new.guild_id.to_string(),
            previous_tags: old
                .map(|channel| channel.applied_tags.iter().map(|id| id.to_string()).collect())
                .unwrap_or_default(),
            current_tags: new.applied_tags.iter().map(|id| id.to_string()).collect(),
            available_tags: parent
                .available_tags
                .iter()
                .map(|tag| TagInfo {
                    id: tag.id.to_string(),
                    name: tag.name.clone(),
                })
                .collect(),
            parent_is_forum: true,
        };

        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.handle_thread_tags(event).await;
        });
    }

    async fn guild_member_addition(&self, _ctx: Context, member: Member) {
        let event = MemberJoinEvent {
            user_id: member.user.id.to_string(),
            guild_id: member.guild_id.to_string(),
            username: member.user.tag(),
        };

        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.handle_member_join(event).await;
        });
    }
}
