//! Per-event pipeline wiring.
//!
//! Each inbound gateway event runs: context → classification → (drop) →
//! rate check (DMs only) → (blocked notice) → analytics (fire-and-forget) →
//! session routing → agent generate with retry → reply dispatch. Lifecycle
//! events (forum post created, post resolved, member joined) take a parallel
//! path that skips rate limiting.
//!
//! All per-event errors stop here as log lines; nothing propagates to the
//! process level.

use crate::analytics::AnalyticsRecorder;
use crate::context::{InteractionContext, TriggerReason, classify};
use crate::dispatch::{ChatTransport, ResponseDispatcher};
use crate::gateway::{AgentGateway, GenerateBackend, RuntimeContext, WebhookClient, format_with_context};
use crate::ratelimit::{RateLimitDecision, RateLimitStore, RateLimiter};
use crate::session::session_key;
use crate::{MemberJoinEvent, MessageEvent, ThreadCreateEvent, ThreadTagsEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::time::Instant;

/// How long a freshly auto-created thread suppresses its own starter
/// message from the message-level pipeline.
const PENDING_THREAD_TTL: Duration = Duration::from_secs(5);
/// Discord creates the starter message slightly after the thread itself.
const STARTER_MESSAGE_WAIT: Duration = Duration::from_millis(1500);
/// Messages fetched for a resolved-post transcript.
const TRANSCRIPT_FETCH_LIMIT: u8 = 50;
/// Tail of the discussion included in the transcript.
const TRANSCRIPT_TAIL: usize = 5;

/// Short-lived set of thread ids recently created by the thread-create
/// handler. Entries expire after [`PENDING_THREAD_TTL`]; expired entries are
/// pruned on access.
pub struct PendingThreadGuard {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl PendingThreadGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, thread_id: &str) {
        let mut entries = self.entries.lock().expect("guard lock poisoned");
        let now = Instant::now();
        entries.retain(|_, inserted| now.duration_since(*inserted) < self.ttl);
        entries.insert(thread_id.to_string(), now);
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        let mut entries = self.entries.lock().expect("guard lock poisoned");
        let now = Instant::now();
        entries.retain(|_, inserted| now.duration_since(*inserted) < self.ttl);
        entries.contains_key(thread_id)
    }
}

/// Long-lived event router, constructed once at startup with injected
/// configuration. Owns the pipeline components and the thread guard.
pub struct Orchestrator<T, B, S> {
    watched_channel: String,
    resolved_tag: String,
    /// Our own user id, learned from the gateway `ready` event. Mention
    /// classification is inert until it is set.
    bot_user_id: OnceLock<String>,
    transport: Arc<T>,
    dispatcher: ResponseDispatcher<T>,
    gateway: AgentGateway<B>,
    webhook: Option<WebhookClient>,
    limiter: RateLimiter<S>,
    recorder: Arc<AnalyticsRecorder>,
    pending_threads: PendingThreadGuard,
}

impl<T, B, S> Orchestrator<T, B, S>
where
    T: ChatTransport + 'static,
    B: GenerateBackend,
    S: RateLimitStore,
{
    pub fn new(
        watched_channel: String,
        resolved_tag: String,
        transport: Arc<T>,
        gateway: AgentGateway<B>,
        webhook: Option<WebhookClient>,
        limiter: RateLimiter<S>,
        recorder: Arc<AnalyticsRecorder>,
    ) -> Self {
        Self {
            watched_channel,
            resolved_tag,
            bot_user_id: OnceLock::new(),
            dispatcher: ResponseDispatcher::new(transport.clone()),
            transport,
            gateway,
            webhook,
            limiter,
            recorder,
            pending_threads: PendingThreadGuard::new(PENDING_THREAD_TTL),
        }
    }

    /// Record our own user id once the gateway session is ready.
    pub fn set_bot_user_id(&self, id: String) {
        let _ = self.bot_user_id.set(id);
    }

    /// Handle one inbound chat message end to end.
    pub async fn handle_message(&self, event: MessageEvent) {
        let bot_user_id = self.bot_user_id.get().map(String::as_str).unwrap_or("");
        let recently_created = event.is_thread && self.pending_threads.contains(&event.channel_id);

        let trigger = classify(&event, bot_user_id, &self.watched_channel, recently_created);
        if trigger == TriggerReason::Unknown {
            tracing::trace!(message_id = %event.id, "message not forwardable, dropping");
            return;
        }

        tracing::debug!(
            %trigger,
            author = %event.author_handle,
            channel = %event.channel_name,
            "forwarding message"
        );

        let ctx = InteractionContext::from_message(&event, trigger);

        // Public-channel and thread interactions are not per-user throttled;
        // only DMs hit the limiter.
        if trigger == TriggerReason::DirectMessage {
            let now_ms = chrono::Utc::now().timestamp_millis();
            if let RateLimitDecision::Blocked { retry_after_secs } =
                self.limiter.check(&ctx.author_id, now_ms).await
            {
                tracing::info!(author_id = %ctx.author_id, retry_after_secs, "rate limited");
                let notice = format!(
                    "🐢 Slow down! You've sent {} messages in the last minute. Try again in {} seconds.",
                    self.limiter.max_requests(),
                    retry_after_secs
                );
                self.dispatcher.deliver(&event, &notice).await;
                return;
            }
        }

        self.spawn_usage_record(ctx.clone(), event.content.clone());

        let formatted =
            format_with_context(trigger, &ctx.author_handle, &ctx.channel_name, &event.content);
        let session_id = session_key(&ctx);

        match self
            .gateway
            .generate(&session_id, formatted, RuntimeContext::new("message", ctx))
            .await
        {
            Ok(reply) if !reply.text.is_empty() => {
                self.dispatcher.deliver(&event, &reply.text).await;
            }
            Ok(_) => {
                tracing::debug!(session_id, "agent returned no text, nothing to deliver");
            }
            Err(error) => {
                tracing::error!(session_id, author = %event.author_handle, %error, "agent generate failed, dropping event");
            }
        }
    }

    /// Handle a newly created thread. Only forum posts are forwarded; the
    /// guard entry keeps the message-level pipeline from answering the
    /// starter message a second time.
    pub async fn handle_thread_create(&self, event: ThreadCreateEvent) {
        if !event.parent_is_forum {
            return;
        }

        tracing::info!(thread = %event.thread_name, "new forum post");
        self.pending_threads.insert(&event.thread_id);

        tokio::time::sleep(STARTER_MESSAGE_WAIT).await;

        let starter = match self.transport.fetch_starter_message(&event.thread_id).await {
            Ok(Some(starter)) => starter,
            Ok(None) => {
                tracing::debug!(thread_id = %event.thread_id, "no starter message yet, skipping");
                return;
            }
            Err(error) => {
                tracing::error!(thread_id = %event.thread_id, %error, "failed to fetch starter message");
                return;
            }
        };

        let ctx = InteractionContext {
            channel_id: event.thread_id.clone(),
            channel_name: event.thread_name.clone(),
            channel_type: crate::ChannelKind::Forum.as_str().to_string(),
            guild_id: event.guild_id.clone(),
            author_id: starter.author_id.clone(),
            author_handle: starter.author_handle.clone(),
            message_id: starter.id.clone(),
            is_thread: true,
            parent_channel_id: event.parent_channel_id.clone(),
            trigger: TriggerReason::NewForumPost,
        };

        let content = format!("Title: {}\n\n{}", event.thread_name, starter.content);
        self.spawn_usage_record(ctx.clone(), content.clone());

        let formatted = format_with_context(
            TriggerReason::NewForumPost,
            &ctx.author_handle,
            &ctx.channel_name,
            &content,
        );
        let session_id = session_key(&ctx);

        match self
            .gateway
            .generate(&session_id, formatted, RuntimeContext::new("new_forum_post", ctx))
            .await
        {
            Ok(reply) if !reply.text.is_empty() => {
                self.dispatcher.post_to_thread(&event.thread_id, &reply.text).await;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(thread_id = %event.thread_id, %error, "agent generate failed for forum post");
            }
        }
    }

    /// Handle an applied-tag change on a thread. Fires only on the
    /// transition into the resolved tag; the agent gets a transcript so it
    /// can archive the solved question.
    pub async fn handle_thread_tags(&self, event: ThreadTagsEvent) {
        if !event.parent_is_forum || !event.tag_newly_applied(&self.resolved_tag) {
            return;
        }

        tracing::info!(thread = %event.thread_name, "forum post resolved");

        let mut messages = match self
            .transport
            .fetch_recent_messages(&event.thread_id, TRANSCRIPT_FETCH_LIMIT)
            .await
        {
            Ok(messages) => messages,
            Err(error) => {
                tracing::error!(thread_id = %event.thread_id, %error, "failed to fetch thread transcript");
                return;
            }
        };

        messages.sort_by_key(|m| m.timestamp_ms);
        let Some(first) = messages.first().cloned() else {
            return;
        };

        let tail_start = messages.len().saturating_sub(TRANSCRIPT_TAIL);
        let discussion = messages[tail_start..]
            .iter()
            .map(|m| format!("{}: {}", m.author_handle, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let ctx = InteractionContext {
            channel_id: event.thread_id.clone(),
            channel_name: event.thread_name.clone(),
            channel_type: crate::ChannelKind::Forum.as_str().to_string(),
            guild_id: event.guild_id.clone(),
            author_id: first.author_id.clone(),
            author_handle: first.author_handle.clone(),
            message_id: first.id.clone(),
            is_thread: true,
            parent_channel_id: None,
            trigger: TriggerReason::ForumResolved,
        };

        let content = format!(
            "Title: {}\n\nQuestion: {}\n\nDiscussion:\n{}",
            event.thread_name, first.content, discussion
        );
        self.spawn_usage_record(ctx.clone(), content.clone());

        let formatted = format_with_context(
            TriggerReason::ForumResolved,
            &ctx.author_handle,
            &ctx.channel_name,
            &content,
        );
        let session_id = session_key(&ctx);
        let thread_url = format!(
            "https://discord.com/channels/{}/{}",
            event.guild_id, event.thread_id
        );

        match self
            .gateway
            .generate(
                &session_id,
                formatted,
                RuntimeContext::new("forum_post_resolved", ctx).with_thread_url(thread_url),
            )
            .await
        {
            Ok(reply) if !reply.text.is_empty() => {
                self.dispatcher.post_to_thread(&event.thread_id, &reply.text).await;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(thread_id = %event.thread_id, %error, "agent generate failed for resolved post");
            }
        }
    }

    /// Notify the agent platform's member-join webhook. Errors are logged
    /// and swallowed.
    pub async fn handle_member_join(&self, event: MemberJoinEvent) {
        tracing::info!(username = %event.username, "new member");

        let Some(webhook) = &self.webhook else {
            return;
        };

        let payload = serde_json::json!({
            "userId": event.user_id,
            "guildId": event.guild_id,
            "username": event.username,
        });

        if let Err(error) = webhook.notify("new-member", &payload).await {
            tracing::error!(%error, "member-join webhook failed");
        }
    }

    fn spawn_usage_record(&self, ctx: InteractionContext, text: String) {
        let recorder = self.recorder.clone();
        tokio::spawn(async move {
            recorder.record(&ctx, &text).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeliveryError, GatewayError, StoreError};
    use crate::gateway::{AgentReply, GenerateRequest};
    use crate::ratelimit::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_MS};
    use crate::{ChannelKind, TagInfo, ThreadMessage};
    use sqlx::sqlite::SqlitePoolOptions;

    #[derive(Default)]
    struct FakeTransport {
        replies: Mutex<Vec<(String, String, String)>>,
        sends: Mutex<Vec<(String, String)>>,
        starter: Mutex<Option<ThreadMessage>>,
        history: Mutex<Vec<ThreadMessage>>,
    }

    impl ChatTransport for FakeTransport {
        async fn reply(
            &self,
            channel_id: &str,
            message_id: &str,
            text: &str,
        ) -> Result<(), DeliveryError> {
            self.replies.lock().unwrap().push((
                channel_id.to_string(),
                message_id.to_string(),
                text.to_string(),
            ));
            Ok(())
        }

        async fn send(&self, channel_id: &str, text: &str) -> Result<(), DeliveryError> {
            self.sends
                .lock()
                .unwrap()
                .push((channel_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn create_thread(
            &self,
            channel_id: &str,
            _message_id: &str,
            _name: &str,
        ) -> Result<String, DeliveryError> {
            Ok(format!("spawned-in-{channel_id}"))
        }

        async fn fetch_starter_message(
            &self,
            _thread_id: &str,
        ) -> Result<Option<ThreadMessage>, DeliveryError> {
            Ok(self.starter.lock().unwrap().clone())
        }

        async fn fetch_recent_messages(
            &self,
            _channel_id: &str,
            _limit: u8,
        ) -> Result<Vec<ThreadMessage>, DeliveryError> {
            Ok(self.history.lock().unwrap().clone())
        }
    }

    /// Backend stub that records (session, formatted text) per call.
    struct RecordingBackend {
        calls: Mutex<Vec<(String, String)>>,
        reply_text: String,
    }

    impl RecordingBackend {
        fn replying(text: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reply_text: text.to_string(),
            }
        }
    }

    impl GenerateBackend for Arc<RecordingBackend> {
        async fn call(
            &self,
            session_id: &str,
            request: &GenerateRequest,
        ) -> Result<AgentReply, GatewayError> {
            self.calls
                .lock()
                .unwrap()
                .push((session_id.to_string(), request.messages[0].text.clone()));
            Ok(AgentReply {
                text: self.reply_text.clone(),
            })
        }
    }

    struct MemoryStore {
        entries: Mutex<HashMap<String, Vec<i64>>>,
    }

    impl RateLimitStore for MemoryStore {
        async fn load(&self, user_id: &str) -> Result<Vec<i64>, StoreError> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .get(user_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn save(&self, user_id: &str, timestamps: &[i64]) -> Result<(), StoreError> {
            self.entries
                .lock()
                .unwrap()
                .insert(user_id.to_string(), timestamps.to_vec());
            Ok(())
        }
    }

    async fn setup(
        reply_text: &str,
    ) -> (
        Orchestrator<FakeTransport, Arc<RecordingBackend>, MemoryStore>,
        Arc<FakeTransport>,
        Arc<RecordingBackend>,
    ) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_schema(&pool).await.unwrap();

        let transport = Arc::new(FakeTransport::default());
        let backend = Arc::new(RecordingBackend::replying(reply_text));
        let orchestrator = Orchestrator::new(
            "ask-help".into(),
            "Resolved".into(),
            transport.clone(),
            AgentGateway::new(backend.clone()),
            None,
            RateLimiter::new(
                MemoryStore {
                    entries: Mutex::new(HashMap::new()),
                },
                DEFAULT_WINDOW_MS,
                DEFAULT_MAX_REQUESTS,
            ),
            Arc::new(AnalyticsRecorder::new(pool)),
        );
        orchestrator.set_bot_user_id("bot9".into());
        (orchestrator, transport, backend)
    }

    fn dm_from(user: &str, content: &str) -> MessageEvent {
        MessageEvent {
            id: format!("m-{content}"),
            content: content.into(),
            author_id: user.into(),
            author_handle: user.into(),
            author_is_bot: false,
            channel_id: format!("dm-{user}"),
            channel_name: String::new(),
            channel_kind: ChannelKind::DirectMessage,
            guild_id: String::new(),
            mentions: vec![],
            is_thread: false,
            thread_parent_id: None,
            thread_parent_name: None,
        }
    }

    #[tokio::test]
    async fn test_dm_end_to_end() {
        let (orchestrator, transport, backend) = setup("hi").await;

        orchestrator.handle_message(dm_from("U1", "hello")).await;

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "dm:U1");
        assert_eq!(calls[0].1, "[DM from U1] hello");

        let replies = transport.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].2, "hi");
    }

    #[tokio::test]
    async fn test_unknown_trigger_never_reaches_gateway() {
        let (orchestrator, transport, backend) = setup("hi").await;

        let mut event = dm_from("U1", "hello");
        event.channel_kind = ChannelKind::Text;
        event.channel_name = "random".into();
        orchestrator.handle_message(event).await;

        assert!(backend.calls.lock().unwrap().is_empty());
        assert!(transport.replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sixth_rapid_dm_is_blocked_with_notice() {
        let (orchestrator, transport, backend) = setup("ok").await;

        for i in 0..5 {
            orchestrator
                .handle_message(dm_from("U1", &format!("msg {i}")))
                .await;
        }
        assert_eq!(backend.calls.lock().unwrap().len(), 5);

        orchestrator.handle_message(dm_from("U1", "one too many")).await;

        // Gateway untouched by the blocked message.
        assert_eq!(backend.calls.lock().unwrap().len(), 5);

        let replies = transport.replies.lock().unwrap();
        let notice = &replies.last().unwrap().2;
        assert!(notice.starts_with("🐢 Slow down!"), "got: {notice}");
        let seconds: u64 = notice
            .split("Try again in ")
            .nth(1)
            .and_then(|rest| rest.split(' ').next())
            .and_then(|n| n.parse().ok())
            .unwrap();
        assert!((1..=60).contains(&seconds));
    }

    #[tokio::test]
    async fn test_mentions_are_not_rate_limited() {
        let (orchestrator, _transport, backend) = setup("ok").await;

        for i in 0..10 {
            let mut event = dm_from("U1", &format!("ping {i}"));
            event.channel_kind = ChannelKind::Text;
            event.channel_name = "general".into();
            event.guild_id = "g1".into();
            event.mentions = vec!["bot9".into()];
            orchestrator.handle_message(event).await;
        }

        assert_eq!(backend.calls.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_forum_post_handled_and_starter_message_suppressed() {
        let (orchestrator, transport, backend) = setup("welcome!").await;
        // Pause after setup: the sqlite pool needs a running clock to
        // connect, the guard-expiry assertions need a controllable one.
        tokio::time::pause();

        *transport.starter.lock().unwrap() = Some(ThreadMessage {
            id: "t77".into(),
            author_id: "U3".into(),
            author_handle: "carol#7".into(),
            content: "my deploy hangs".into(),
            timestamp_ms: 1,
        });

        orchestrator
            .handle_thread_create(ThreadCreateEvent {
                thread_id: "t77".into(),
                thread_name: "deploy hangs".into(),
                guild_id: "g1".into(),
                parent_channel_id: Some("forum1".into()),
                parent_is_forum: true,
            })
            .await;

        {
            let calls = backend.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].0, "thread:t77");
            assert_eq!(
                calls[0].1,
                "[New Forum Post | carol#7] Title: deploy hangs\n\nmy deploy hangs"
            );
        }
        assert_eq!(
            *transport.sends.lock().unwrap(),
            vec![("t77".to_string(), "welcome!".to_string())]
        );

        // The starter message arrives through messageCreate moments later;
        // the guard keeps it from being answered twice.
        let mut starter_event = dm_from("U3", "my deploy hangs");
        starter_event.channel_kind = ChannelKind::Thread;
        starter_event.channel_id = "t77".into();
        starter_event.channel_name = "deploy hangs".into();
        starter_event.guild_id = "g1".into();
        starter_event.is_thread = true;
        starter_event.thread_parent_id = Some("forum1".into());
        starter_event.thread_parent_name = Some("ask-help".into());
        orchestrator.handle_message(starter_event.clone()).await;

        assert_eq!(backend.calls.lock().unwrap().len(), 1);

        // After the guard expires, thread replies flow normally again.
        tokio::time::advance(Duration::from_secs(6)).await;
        orchestrator.handle_message(starter_event).await;
        assert_eq!(backend.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_forum_thread_create_is_ignored() {
        let (orchestrator, _transport, backend) = setup("ok").await;

        orchestrator
            .handle_thread_create(ThreadCreateEvent {
                thread_id: "t1".into(),
                thread_name: "chat".into(),
                guild_id: "g1".into(),
                parent_channel_id: Some("c1".into()),
                parent_is_forum: false,
            })
            .await;

        assert!(backend.calls.lock().unwrap().is_empty());
    }

    fn transcript(n: usize) -> Vec<ThreadMessage> {
        (0..n)
            .map(|i| ThreadMessage {
                id: format!("m{i}"),
                author_id: format!("u{i}"),
                author_handle: format!("user{i}"),
                content: format!("line {i}"),
                timestamp_ms: i as i64,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_resolved_tag_transition_sends_transcript() {
        let (orchestrator, transport, backend) = setup("archived").await;
        *transport.history.lock().unwrap() = transcript(8);

        orchestrator
            .handle_thread_tags(ThreadTagsEvent {
                thread_id: "t9".into(),
                thread_name: "stuck build".into(),
                guild_id: "g1".into(),
                previous_tags: vec![],
                current_tags: vec!["tag-resolved".into()],
                available_tags: vec![TagInfo {
                    id: "tag-resolved".into(),
                    name: "Resolved".into(),
                }],
                parent_is_forum: true,
            })
            .await;

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "thread:t9");
        let text = &calls[0].1;
        assert!(text.starts_with("[Forum Resolved | user0] Title: stuck build"));
        assert!(text.contains("Question: line 0"));
        // Last five messages only.
        assert!(text.contains("user3: line 3"));
        assert!(text.contains("user7: line 7"));
        assert!(!text.contains("user2: line 2"));

        assert_eq!(
            *transport.sends.lock().unwrap(),
            vec![("t9".to_string(), "archived".to_string())]
        );
    }

    #[tokio::test]
    async fn test_tag_change_without_resolved_transition_is_ignored() {
        let (orchestrator, _transport, backend) = setup("ok").await;

        orchestrator
            .handle_thread_tags(ThreadTagsEvent {
                thread_id: "t9".into(),
                thread_name: "stuck build".into(),
                guild_id: "g1".into(),
                previous_tags: vec!["tag-resolved".into()],
                current_tags: vec!["tag-resolved".into()],
                available_tags: vec![TagInfo {
                    id: "tag-resolved".into(),
                    name: "Resolved".into(),
                }],
                parent_is_forum: true,
            })
            .await;

        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_thread_guard_expires() {
        let guard = PendingThreadGuard::new(Duration::from_secs(5));
        guard.insert("t1");
        assert!(guard.contains("t1"));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(guard.contains("t1"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!guard.contains("t1"));
    }
}
