//! Per-tenant voice session state machine: attachment, reconnection,
//! auto-leave/auto-follow, greet/farewell, and the health loop.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, Instant},
};

use rand::seq::SliceRandom as _;
use tokio::{
    sync::Mutex as AsyncMutex,
    task::JoinHandle,
    time::{delay_for, timeout},
};
use voicecast_log::log;

use crate::{
    cli::DropPolicy,
    context::AppContext,
    error::CoreError,
    platform::{non_bot_count, Member},
    queue::{QueueItem, UtteranceQueue},
    router,
};

/// Minimum time between two connect attempts for the same tenant.
const CONNECT_COOLDOWN: Duration = Duration::from_secs(5);

/// Timeout applied to the platform-side connect call.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Health loop tick interval.
const HEALTH_TICK: Duration = Duration::from_secs(20);

/// Delay before a greeting is enqueued, to let a flaky attachment settle.
const GREETING_DELAY: Duration = Duration::from_secs(2);

/// Volume used for greet/farewell announcements.
const ANNOUNCEMENT_VOLUME: f32 = 0.8;

const FIRST_GREETINGS: &[&str] = &[
    "Welcome back, {name}! Good to see you today.",
    "Hey {name}, welcome in!",
];
const GREETINGS: &[&str] = &["{name} has joined.", "Hi, {name}!"];
const FAREWELLS: &[&str] = &["{name} has left.", "Goodbye, {name}."];

/// Reason a session is being disconnected, governing whether
/// `last_channel_id` is cleared (so the health loop will or won't
/// attempt to restore the attachment).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DisconnectReason {
    /// An explicit "leave" command.
    SlashLeave,
    /// The bot's channel became empty of non-bot members.
    Alone,
    /// The platform reported the client as disconnected out of band.
    Disconnected,
}

/// Attachment state of a tenant's voice session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AttachState {
    Detached,
    Connecting,
    Attached(u64),
    Disconnecting,
}

/// One tenant's in-memory voice session.
pub struct GuildSession {
    guild_id: u64,
    connect_lock: AsyncMutex<()>,
    state: StdMutex<AttachState>,
    sink: StdMutex<Option<Arc<dyn crate::platform::VoiceSink>>>,
    locked_channel_id: StdMutex<Option<u64>>,
    last_channel_id: StdMutex<Option<u64>>,
    last_connect_attempt: StdMutex<Option<Instant>>,
    last_speaker_id: StdMutex<Option<u64>>,
    last_auto_read: StdMutex<HashMap<u64, Instant>>,
    worker: StdMutex<Option<JoinHandle<()>>>,

    /// FIFO of pending utterances for this tenant.
    pub queue: UtteranceQueue,
}

impl std::fmt::Debug for GuildSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildSession")
            .field("guild_id", &self.guild_id)
            .field("state", &*self.state.lock().expect("state lock poisoned"))
            .finish()
    }
}

impl GuildSession {
    fn new(guild_id: u64, queue_capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            guild_id,
            connect_lock: AsyncMutex::new(()),
            state: StdMutex::new(AttachState::Detached),
            sink: StdMutex::new(None),
            locked_channel_id: StdMutex::new(None),
            last_channel_id: StdMutex::new(None),
            last_connect_attempt: StdMutex::new(None),
            last_speaker_id: StdMutex::new(None),
            last_auto_read: StdMutex::new(HashMap::new()),
            worker: StdMutex::new(None),
            queue: UtteranceQueue::new(queue_capacity, drop_policy),
        }
    }

    /// The channel this session is currently attached to, if any.
    #[must_use]
    pub fn attached_channel(&self) -> Option<u64> {
        match *self.state.lock().expect("state lock poisoned") {
            AttachState::Attached(c) => Some(c),
            _ => None,
        }
    }

    /// The channel the health loop should try to restore attachment to.
    #[must_use]
    pub fn reattach_target(&self) -> Option<u64> {
        self.locked_channel_id
            .lock()
            .expect("locked channel lock poisoned")
            .or(*self.last_channel_id.lock().expect("last channel lock poisoned"))
    }

    /// Returns the last user attributed as the active chat speaker, and
    /// records `speaker` as the new one.
    #[must_use]
    pub fn swap_last_speaker(&self, speaker: u64) -> Option<u64> {
        let mut last = self.last_speaker_id.lock().expect("speaker lock poisoned");
        last.replace(speaker)
    }

    /// Returns `true` if `user_id` may have another auto-read utterance
    /// enqueued right now given `cooldown`, recording the attempt either
    /// way so a rejected burst doesn't reset the window.
    fn check_user_cooldown(&self, user_id: u64, cooldown: Duration) -> bool {
        let mut last = self
            .last_auto_read
            .lock()
            .expect("auto-read cooldown lock poisoned");
        let now = Instant::now();
        let allowed = match last.get(&user_id) {
            Some(prev) => now.duration_since(*prev) >= cooldown,
            None => true,
        };
        if allowed {
            last.insert(user_id, now);
        }
        allowed
    }

    /// Ensures this session is attached to `target_channel`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Locked`] if already attached elsewhere,
    /// [`CoreError::Cooldown`] if reconnecting too soon, or
    /// [`CoreError::ConnectFailed`] if the platform connect fails.
    pub async fn ensure_connected(
        self: &Arc<Self>,
        ctx: &AppContext,
        target_channel: u64,
    ) -> Result<(), CoreError> {
        let _guard = self.connect_lock.lock().await;

        match *self.state.lock().expect("state lock poisoned") {
            AttachState::Attached(c) if c == target_channel => return Ok(()),
            AttachState::Attached(c) => return Err(CoreError::Locked(c)),
            _ => {}
        }

        // If the platform already reports us as connected to the target
        // channel, this is an adoption of an existing client rather than
        // a fresh connect attempt: the reconnect cooldown doesn't apply,
        // since no actual network join is about to happen.
        let already_reported =
            ctx.platform.reported_channel(self.guild_id) == Some(target_channel);

        if !already_reported {
            let mut last = self
                .last_connect_attempt
                .lock()
                .expect("connect attempt lock poisoned");
            if let Some(prev) = *last {
                if prev.elapsed() < CONNECT_COOLDOWN {
                    return Err(CoreError::Cooldown);
                }
            }
            *last = Some(Instant::now());
        }

        *self.locked_channel_id.lock().expect("locked channel lock poisoned") =
            Some(target_channel);
        *self.state.lock().expect("state lock poisoned") = AttachState::Connecting;

        let connected =
            timeout(CONNECT_TIMEOUT, ctx.platform.connect(self.guild_id, target_channel))
                .await;

        let sink = match connected {
            Ok(Ok(sink)) => sink,
            Ok(Err(err)) => {
                self.clear_connecting_state();
                return Err(err);
            }
            Err(_) => {
                self.clear_connecting_state();
                return Err(CoreError::ConnectFailed("connect timed out".into()));
            }
        };

        *self.sink.lock().expect("sink lock poisoned") = Some(Arc::from(sink));
        *self.last_channel_id.lock().expect("last channel lock poisoned") =
            Some(target_channel);
        *self.state.lock().expect("state lock poisoned") =
            AttachState::Attached(target_channel);

        self.start_worker(ctx.clone());
        Ok(())
    }

    /// Moves an already-attached session to `target_channel` in place,
    /// without dropping the sink or restarting the worker.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Locked`] if not currently attached, or
    /// whatever [`Platform::move_to`] returns on failure.
    pub async fn move_to(
        self: &Arc<Self>,
        ctx: &AppContext,
        target_channel: u64,
    ) -> Result<(), CoreError> {
        let _guard = self.connect_lock.lock().await;

        match *self.state.lock().expect("state lock poisoned") {
            AttachState::Attached(c) if c == target_channel => return Ok(()),
            AttachState::Attached(_) => {}
            _ => return Err(CoreError::Other("session is not attached to any channel".into())),
        }

        ctx.platform.move_to(self.guild_id, target_channel).await?;

        *self.locked_channel_id.lock().expect("locked channel lock poisoned") =
            Some(target_channel);
        *self.last_channel_id.lock().expect("last channel lock poisoned") =
            Some(target_channel);
        *self.state.lock().expect("state lock poisoned") =
            AttachState::Attached(target_channel);
        Ok(())
    }

    fn clear_connecting_state(&self) {
        *self.state.lock().expect("state lock poisoned") = AttachState::Detached;
        *self.locked_channel_id.lock().expect("locked channel lock poisoned") = None;
    }

    /// Disconnects this session, stopping its worker and clearing
    /// in-memory state. `reason` governs whether `last_channel_id` is
    /// retained for the health loop to act on.
    pub async fn disconnect(self: &Arc<Self>, ctx: &AppContext, reason: DisconnectReason) {
        let _guard = self.connect_lock.lock().await;

        let was_attached =
            matches!(*self.state.lock().expect("state lock poisoned"), AttachState::Attached(_));
        if was_attached {
            *self.state.lock().expect("state lock poisoned") = AttachState::Disconnecting;
            ctx.platform.disconnect(self.guild_id).await;
        }

        *self.sink.lock().expect("sink lock poisoned") = None;
        *self.locked_channel_id.lock().expect("locked channel lock poisoned") = None;
        *self.last_speaker_id.lock().expect("speaker lock poisoned") = None;
        if matches!(reason, DisconnectReason::SlashLeave | DisconnectReason::Alone) {
            *self.last_channel_id.lock().expect("last channel lock poisoned") = None;
        }
        *self.state.lock().expect("state lock poisoned") = AttachState::Detached;

        self.stop_worker().await;
    }

    fn start_worker(self: &Arc<Self>, ctx: AppContext) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_worker(ctx).await });
        *self.worker.lock().expect("worker lock poisoned") = Some(handle);
    }

    async fn stop_worker(&self) {
        self.queue.close();
        let handle = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log::warn!("voice worker task panicked"; "error" => ?err);
            }
        }
    }

    async fn run_worker(self: Arc<Self>, ctx: AppContext) {
        while let Some(item) = self.queue.dequeue().await {
            if let Err(err) = self.play_one(&ctx, item).await {
                log::warn!(
                    "playback failed";
                    "guild_id" => self.guild_id,
                    "error" => %err,
                );
            }
        }
    }

    async fn play_one(
        self: &Arc<Self>,
        ctx: &AppContext,
        item: QueueItem,
    ) -> Result<(), CoreError> {
        let sink = self.sink.lock().expect("sink lock poisoned").clone();
        let sink = match sink {
            Some(sink) => sink,
            None => return Ok(()),
        };

        let settings = ctx
            .settings
            .get(self.guild_id)
            .await
            .map_err(|err| CoreError::Other(err.to_string()))?;

        let text = crate::textutil::truncate_chars(
            item.text.trim(),
            settings.max_tts_chars as usize,
        );
        if text.is_empty() {
            return Ok(());
        }

        let (stream, producer) = ctx.tts.get_tts_stream(
            text,
            item.voice_id,
            settings.fallback_voice.clone(),
        );
        let volume = item.volume.unwrap_or(1.0).clamp(0.0, 2.0);

        let play_result = match timeout(
            Duration::from_secs(ctx.config.max_audio_seconds),
            sink.play(stream, volume),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CoreError::Other("utterance playback timed out".to_owned())),
        };
        let producer_result = producer
            .await
            .map_err(|err| CoreError::Other(err.to_string()))?;
        play_result.and(producer_result)
    }

    async fn maybe_greet(self: &Arc<Self>, ctx: &AppContext, user_id: u64, first_of_day: bool) {
        delay_for(GREETING_DELAY).await;
        if self.attached_channel().is_none() {
            return;
        }
        let name = ctx.platform.display_name(user_id);
        let templates = if first_of_day { FIRST_GREETINGS } else { GREETINGS };
        let template = templates
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(templates[0]);
        let text = template.replace("{name}", &name);
        self.queue.enqueue(QueueItem {
            text,
            voice_id: self.default_voice(ctx).await,
            volume: Some(ANNOUNCEMENT_VOLUME),
        });
    }

    fn enqueue_farewell(&self, ctx_default_voice: String, user_name: &str) {
        let template = FAREWELLS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(FAREWELLS[0]);
        let text = template.replace("{name}", user_name);
        self.queue.enqueue(QueueItem {
            text,
            voice_id: ctx_default_voice,
            volume: Some(ANNOUNCEMENT_VOLUME),
        });
    }

    async fn default_voice(&self, ctx: &AppContext) -> String {
        ctx.settings
            .get(self.guild_id)
            .await
            .map(|s| s.default_voice_id)
            .unwrap_or_else(|_| "en_us_001".to_owned())
    }
}

/// Registry of per-tenant voice sessions, one per process.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: StdMutex<HashMap<u64, Arc<GuildSession>>>,
    seen_today: StdMutex<HashMap<(u64, u64), String>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tenant's session, lazily creating it on first access.
    pub fn get_or_create(
        &self,
        guild_id: u64,
        queue_capacity: usize,
        drop_policy: DropPolicy,
    ) -> Arc<GuildSession> {
        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        Arc::clone(
            sessions
                .entry(guild_id)
                .or_insert_with(|| Arc::new(GuildSession::new(guild_id, queue_capacity, drop_policy))),
        )
    }

    /// Returns the tenant's session if it has already been created.
    #[must_use]
    pub fn get(&self, guild_id: u64) -> Option<Arc<GuildSession>> {
        self.sessions.lock().expect("sessions lock poisoned").get(&guild_id).cloned()
    }

    /// Lists every tenant with a known session.
    #[must_use]
    pub fn guild_ids(&self) -> Vec<u64> {
        self.sessions.lock().expect("sessions lock poisoned").keys().copied().collect()
    }

    /// Returns `true` if this is the first time `(guild_id, user_id)` is
    /// seen on `date_key` (e.g. `"2026-07-31"`), recording it either way.
    fn mark_seen(&self, guild_id: u64, user_id: u64, date_key: &str) -> bool {
        let mut seen = self.seen_today.lock().expect("seen lock poisoned");
        let first = seen.get(&(guild_id, user_id)).map(String::as_str) != Some(date_key);
        seen.insert((guild_id, user_id), date_key.to_owned());
        first
    }
}

/// Handles a voice-state transition for `user_id` moving from
/// `old_channel` to `new_channel` (either may be [`None`]): drives
/// auto-leave, auto-follow, and greet/farewell.
pub async fn on_voice_state_changed(
    ctx: &AppContext,
    guild_id: u64,
    user_id: u64,
    date_key: &str,
    old_channel: Option<u64>,
    new_channel: Option<u64>,
    queue_capacity: usize,
    drop_policy: DropPolicy,
) {
    let session = ctx.sessions.get_or_create(guild_id, queue_capacity, drop_policy);
    let settings = match ctx.settings.get(guild_id).await {
        Ok(s) => s,
        Err(err) => {
            log::warn!("failed to load settings for voice-state update"; "error" => %err);
            return;
        }
    };
    let bot_channel = session.attached_channel();

    if let Some(bot_channel) = bot_channel {
        let joined = new_channel == Some(bot_channel) && old_channel != Some(bot_channel);
        let left = old_channel == Some(bot_channel) && new_channel != Some(bot_channel);

        if joined && settings.greet_on_join {
            let first_of_day = ctx.sessions.mark_seen(guild_id, user_id, date_key);
            let session = Arc::clone(&session);
            let ctx = ctx.clone();
            let _ = tokio::spawn(async move {
                session.maybe_greet(&ctx, user_id, first_of_day).await;
            });
        }
        if left && settings.farewell_on_leave {
            let name = ctx.platform.display_name(user_id);
            let default_voice = session.default_voice(ctx).await;
            session.enqueue_farewell(default_voice, &name);
        }

        if settings.leave_when_alone {
            let members = ctx.platform.channel_members(bot_channel);
            if non_bot_count(&members) == 0 {
                session.disconnect(ctx, DisconnectReason::Alone).await;
            }
        }
    }

    if let Some(new_channel) = new_channel {
        if let Some(pref) = ctx.userprefs.get(guild_id, user_id) {
            if pref.auto_join {
                let should_follow = match session.attached_channel() {
                    None => true,
                    Some(current) => {
                        current != new_channel
                            && non_bot_count(&ctx.platform.channel_members(current)) == 0
                    }
                };
                if should_follow {
                    if session.attached_channel().is_some() {
                        if let Err(err) = session.move_to(ctx, new_channel).await {
                            log::warn!(
                                "auto-follow move failed, falling back to reconnect";
                                "error" => %err,
                            );
                            session.disconnect(ctx, DisconnectReason::Alone).await;
                            if let Err(err) = session.ensure_connected(ctx, new_channel).await {
                                log::warn!("auto-follow connect failed"; "error" => %err);
                            }
                        }
                    } else if let Err(err) = session.ensure_connected(ctx, new_channel).await {
                        log::warn!("auto-follow connect failed"; "error" => %err);
                    }
                }
            }
        }
    }
}

/// Handles a chat message for auto-read purposes: checks the tenant's
/// settings and text-channel allowlist, resolves the effective voice and
/// speaker attribution, classifies the content, and enqueues it for
/// playback. A no-op if the bot isn't attached to a voice channel, the
/// channel isn't an allowlisted voice-chat text surface, or the user is
/// within their per-user cooldown.
#[allow(clippy::too_many_arguments)]
pub async fn on_chat_message(
    ctx: &AppContext,
    guild_id: u64,
    channel_id: u64,
    author_id: u64,
    has_image: bool,
    has_video: bool,
    content: &str,
    queue_capacity: usize,
    drop_policy: DropPolicy,
) {
    if !ctx.config.allowlist_text_channel_ids.contains(&channel_id) {
        return;
    }

    let settings = match ctx.settings.get(guild_id).await {
        Ok(s) => s,
        Err(err) => {
            log::warn!("failed to load settings for chat message"; "error" => %err);
            return;
        }
    };
    if !settings.auto_read_messages {
        return;
    }

    let session = ctx.sessions.get_or_create(guild_id, queue_capacity, drop_policy);
    if session.attached_channel().is_none() {
        return;
    }

    let content = crate::textutil::truncate_chars(content.trim(), ctx.config.max_message_chars);
    if content.is_empty() && !has_image && !has_video {
        return;
    }

    if !session.check_user_cooldown(
        author_id,
        Duration::from_secs_f64(ctx.config.user_cooldown_seconds.max(0.0)),
    ) {
        return;
    }

    let pref = ctx.userprefs.get(guild_id, author_id);
    let requested_voice = pref.as_ref().and_then(|p| p.voice_id.clone());
    let voice = router::effective_voice(&settings, requested_voice.as_deref(), false);

    let speak_name = pref
        .as_ref()
        .and_then(|p| p.nickname.clone())
        .unwrap_or_else(|| ctx.platform.display_name(author_id));

    let kind = router::classify_message(has_image, has_video, &content);
    let last_speaker = session.swap_last_speaker(author_id);
    let text =
        router::build_auto_read_text(kind, &speak_name, &content, author_id, last_speaker);

    session.queue.enqueue(QueueItem {
        text,
        voice_id: voice,
        volume: None,
    });
}

/// Runs forever, periodically reconciling each tenant's believed
/// attachment against what the platform reports, reattaching when the
/// platform shows a disconnect and non-bot members remain in the target
/// channel.
pub async fn run_health_loop(ctx: AppContext) {
    loop {
        delay_for(HEALTH_TICK).await;
        for guild_id in ctx.sessions.guild_ids() {
            let session = match ctx.sessions.get(guild_id) {
                Some(s) => s,
                None => continue,
            };
            if let Some(believed) = session.attached_channel() {
                let reported = ctx.platform.reported_channel(guild_id);
                if reported == Some(believed) {
                    continue;
                }
                log::warn!(
                    "attachment state disagrees with platform reality, reconciling";
                    "guild_id" => guild_id,
                    "believed" => believed,
                    "reported" => ?reported,
                );
                session.disconnect(&ctx, DisconnectReason::Disconnected).await;
            }
            let target = match session.reattach_target() {
                Some(t) => t,
                None => continue,
            };
            let members = ctx.platform.channel_members(target);
            if non_bot_count(&members) == 0 {
                continue;
            }
            if let Err(err) = session.ensure_connected(&ctx, target).await {
                log::warn!(
                    "health loop reattach failed";
                    "guild_id" => guild_id,
                    "error" => %err,
                );
            }
        }
    }
}

/// Returns whether `members` still contains a given user, used by
/// callers deciding whether a departure needs handling.
#[must_use]
pub fn member_present(members: &[Member], user_id: u64) -> bool {
    members.iter().any(|m| m.user_id == user_id)
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn new_session_starts_detached() {
        let session = GuildSession::new(1, 10, DropPolicy::DropOldest);
        assert_eq!(session.attached_channel(), None);
    }

    #[test]
    fn registry_returns_the_same_session_for_a_guild() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create(1, 10, DropPolicy::DropOldest);
        let b = registry.get_or_create(1, 10, DropPolicy::DropOldest);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn mark_seen_is_true_only_once_per_day() {
        let registry = SessionRegistry::new();
        assert!(registry.mark_seen(1, 2, "2026-07-31"));
        assert!(!registry.mark_seen(1, 2, "2026-07-31"));
        assert!(registry.mark_seen(1, 2, "2026-08-01"));
    }
}
