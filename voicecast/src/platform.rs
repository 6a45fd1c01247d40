//! Trait boundary to the chat/voice platform SDK.
//!
//! Everything in this module is a contract, not an implementation: the
//! concrete platform binding (event ingestion, RTP/Opus transport, audio
//! mixing) is an external collaborator out of scope for this crate. Tests
//! exercise the core against hand-rolled fakes implementing these traits.

use async_trait::async_trait;

use crate::{error::CoreError, tts::AudioStream};

/// A single member seen in a voice channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Member {
    /// Platform user ID.
    pub user_id: u64,
    /// Whether this member is itself a bot account.
    pub is_bot: bool,
}

/// A live attachment to one voice channel, able to play audio and report
/// when playback has finished.
#[async_trait]
pub trait VoiceSink: Send + Sync {
    /// Streams `audio` into the channel at the given `volume`
    /// (0.0..=2.0), returning once playback has completed.
    async fn play(
        &self,
        audio: AudioStream,
        volume: f32,
    ) -> Result<(), CoreError>;
}

/// The chat/voice platform: guild enumeration, voice attachment, and
/// channel membership queries.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Connects to `channel_id` in `guild_id`, deafened, returning a
    /// handle usable to play audio.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectFailed`] if the platform-side connect
    /// fails or times out.
    async fn connect(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<Box<dyn VoiceSink>, CoreError>;

    /// Disconnects any live voice client for `guild_id`.
    async fn disconnect(&self, guild_id: u64);

    /// Moves an already-connected voice client to `channel_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectFailed`] if the move fails.
    async fn move_to(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<(), CoreError>;

    /// Returns the channel ID the platform currently reports the bot as
    /// connected to in `guild_id`, if any.
    fn reported_channel(&self, guild_id: u64) -> Option<u64>;

    /// Lists members currently present in `channel_id`.
    fn channel_members(&self, channel_id: u64) -> Vec<Member>;

    /// Returns the display name of `user_id`, if known.
    fn display_name(&self, user_id: u64) -> String;

    /// Lists every guild (tenant) the bot is currently a member of, as
    /// `(guild_id, name)` pairs.
    fn guilds(&self) -> Vec<(u64, String)>;

    /// Returns the first voice channel in `guild_id` containing at least
    /// one non-bot member, if any.
    fn first_occupied_voice_channel(&self, guild_id: u64) -> Option<u64>;
}

/// Counts non-bot members of `members`.
#[must_use]
pub fn non_bot_count(members: &[Member]) -> usize {
    members.iter().filter(|m| !m.is_bot).count()
}
