//! Explicit, dependency-injected application context.
//!
//! Every component that needs shared collaborators receives this struct
//! (or a clone of the `Arc` it's wrapped in) rather than reaching for a
//! global singleton.

use std::{sync::Arc, time::Instant};

use crate::{
    cli::{DropPolicy, Opts},
    external::TextGenerator,
    logbuf::LogBuffer,
    platform::Platform,
    session::SessionRegistry,
    settings::SettingsStore,
    tts::TtsClient,
    userprefs::UserPrefStore,
};

/// The subset of [`Opts`] read at runtime by the core (as opposed to
/// purely at startup).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum characters read aloud from one chat message.
    pub max_message_chars: usize,
    /// Maximum characters accepted per synthesized utterance.
    pub max_utterance_chars: usize,
    /// Minimum delay between two auto-read utterances from one user.
    pub user_cooldown_seconds: f64,
    /// Text channel IDs treated as voice chat text surfaces.
    pub allowlist_text_channel_ids: Vec<u64>,
    /// Per-tenant utterance queue capacity.
    pub queue_maxsize: usize,
    /// Queue overflow policy.
    pub drop_policy: DropPolicy,
    /// Maximum duration a single utterance may play for before playback
    /// is aborted.
    pub max_audio_seconds: u64,
}

impl From<&Opts> for RuntimeConfig {
    fn from(opts: &Opts) -> Self {
        Self {
            max_message_chars: opts.max_message_chars,
            max_utterance_chars: opts.max_utterance_chars,
            user_cooldown_seconds: opts.user_cooldown_seconds,
            allowlist_text_channel_ids: opts.allowlist_text_channel_ids.clone(),
            queue_maxsize: opts.queue_maxsize,
            drop_policy: opts.drop_policy,
            max_audio_seconds: opts.max_audio_seconds,
        }
    }
}

/// Shared, injectable application state.
#[derive(Clone)]
pub struct AppContext {
    /// The chat/voice platform collaborator.
    pub platform: Arc<dyn Platform>,
    /// Per-tenant settings store.
    pub settings: Arc<SettingsStore>,
    /// Per-user preference store.
    pub userprefs: Arc<UserPrefStore>,
    /// Streaming TTS client.
    pub tts: Arc<TtsClient>,
    /// Registry of per-tenant voice sessions.
    pub sessions: Arc<SessionRegistry>,
    /// In-memory log ring buffer, served to the control plane.
    pub logs: Arc<LogBuffer>,
    /// Runtime-tunable configuration.
    pub config: Arc<RuntimeConfig>,
    /// Process start time, used to report uptime.
    pub started_at: Instant,
    /// Radio-presenter intro text generator, if configured.
    pub dj_intro: Option<Arc<dyn TextGenerator>>,
    /// Song-suggestion text generator, if configured.
    pub song_suggestions: Option<Arc<dyn TextGenerator>>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("started_at", &self.started_at)
            .finish()
    }
}
