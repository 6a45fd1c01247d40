//! CLI (command line interface) and environment-driven configuration.

use std::{fmt, net::IpAddr, path::PathBuf, str::FromStr as _};

use anyhow::anyhow;
use structopt::StructOpt;
use voicecast_log::slog;

/// Queue overflow policy, selectable via [`Opts::drop_policy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropPolicy {
    /// Remove the oldest queued item to make room for the new one.
    DropOldest,

    /// Reject the new item, leaving the queue untouched.
    Reject,
}

impl FromStr for DropPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_oldest" => Ok(Self::DropOldest),
            "reject" => Ok(Self::Reject),
            _ => Err(anyhow!(
                "'{}' is invalid drop policy, allowed values are: \
                 drop_oldest | reject",
                s,
            )),
        }
    }
}

/// CLI (command line interface) of the voice broadcast server.
#[derive(Clone, Debug, StructOpt)]
#[structopt(about = "Multi-tenant voice broadcast orchestrator")]
pub struct Opts {
    /// Debug mode of the server.
    #[structopt(short, long, help = "Enables debug mode")]
    pub debug: bool,

    /// Whether the operator web UI (HTTP/WS control plane) is enabled.
    #[structopt(
        long,
        env = "WEB_UI_ENABLED",
        default_value = "true",
        help = "Enables the HTTP/WS control plane"
    )]
    pub web_ui_enabled: bool,

    /// IP address for the control plane to listen on.
    #[structopt(
        long,
        env = "WEB_HOST",
        default_value = "127.0.0.1",
        help = "IP to listen the control plane on"
    )]
    pub web_host: IpAddr,

    /// Port for the control plane to listen on.
    #[structopt(
        long,
        env = "WEB_PORT",
        default_value = "8080",
        help = "Port to listen the control plane on"
    )]
    pub web_port: u16,

    /// Bearer token required to access non-allowlisted control plane routes.
    ///
    /// If [`None`], the control plane is unauthenticated.
    #[structopt(
        long,
        env = "WEB_UI_TOKEN",
        help = "Bearer token guarding the control plane"
    )]
    pub web_ui_token: Option<String>,

    /// Verbosity level of the server logs.
    #[structopt(
        long,
        env = "LOG_LEVEL",
        parse(try_from_str = Self::parse_log_level),
        default_value = "INFO",
        help = "Logs verbosity level: \
                OFF | CRIT | ERRO | WARN | INFO | DEBG | TRCE"
    )]
    pub log_level: slog::Level,

    /// Path to a file that log lines are additionally appended to.
    #[structopt(
        long,
        env = "LOG_FILE_PATH",
        help = "Path to a file to append logs to"
    )]
    pub log_file_path: Option<PathBuf>,

    /// Maximum number of log lines kept in the in-memory ring buffer served
    /// by the control plane.
    #[structopt(
        long,
        env = "WEB_LOG_MAX_LINES",
        default_value = "1000",
        help = "Capacity of the in-memory log ring buffer"
    )]
    pub web_log_max_lines: usize,

    /// Maximum number of queued utterances per tenant.
    #[structopt(
        long,
        env = "QUEUE_MAXSIZE",
        default_value = "100",
        help = "Per-tenant utterance queue capacity"
    )]
    pub queue_maxsize: usize,

    /// Policy applied when an utterance arrives at a full queue.
    #[structopt(
        long,
        env = "DROP_POLICY",
        default_value = "drop_oldest",
        help = "Queue overflow policy: drop_oldest | reject"
    )]
    pub drop_policy: DropPolicy,

    /// Coalescing window for batching rapid-fire chat auto-read events.
    #[structopt(
        long,
        env = "COALESCE_MS",
        default_value = "500",
        help = "Coalescing window in milliseconds"
    )]
    pub coalesce_ms: u64,

    /// Maximum characters read aloud from a single chat message.
    #[structopt(
        long,
        env = "MAX_MESSAGE_CHARS",
        default_value = "350",
        help = "Maximum characters read aloud from one chat message"
    )]
    pub max_message_chars: usize,

    /// Maximum characters accepted for a single synthesized utterance.
    #[structopt(
        long,
        env = "MAX_UTTERANCE_CHARS",
        default_value = "1000",
        help = "Maximum characters per synthesized utterance"
    )]
    pub max_utterance_chars: usize,

    /// Minimum delay between two auto-read utterances from the same user.
    #[structopt(
        long,
        env = "USER_COOLDOWN_SECONDS",
        default_value = "1.5",
        help = "Per-user auto-read cooldown, in seconds"
    )]
    pub user_cooldown_seconds: f64,

    /// Maximum duration, in seconds, that a single utterance is allowed to
    /// play for.
    #[structopt(
        long,
        env = "MAX_AUDIO_SECONDS",
        default_value = "20",
        help = "Maximum playback duration per utterance, in seconds"
    )]
    pub max_audio_seconds: u64,

    /// Maximum number of retries attempted against the primary TTS provider.
    #[structopt(
        long,
        env = "MAX_RETRIES",
        default_value = "2",
        help = "Maximum retries against the primary TTS provider"
    )]
    pub max_retries: u32,

    /// Number of seconds a worker may remain busy on one utterance before
    /// it is considered stuck by diagnostics.
    #[structopt(
        long,
        env = "STUCK_SECONDS",
        default_value = "45",
        help = "Seconds before an in-flight utterance is considered stuck"
    )]
    pub stuck_seconds: u64,

    /// Overall timeout for a single TTS provider HTTP request.
    #[structopt(
        long,
        env = "TTS_HTTP_TIMEOUT",
        default_value = "20",
        help = "TTS provider HTTP timeout, in seconds"
    )]
    pub tts_http_timeout: u64,

    /// Text channel IDs treated as "voice chat text channels" regardless of
    /// platform-reported association, as a comma-separated list.
    #[structopt(
        long,
        env = "ALLOWLIST_TEXT_CHANNEL_IDS",
        default_value = "",
        parse(from_str = Self::parse_channel_allowlist),
        help = "Comma-separated text channel IDs treated as voice chat text"
    )]
    pub allowlist_text_channel_ids: Vec<u64>,

    /// Path to the durable settings store (JSON file).
    #[structopt(
        long,
        env = "SETTINGS_PATH",
        default_value = "settings.json",
        help = "Path to the guild settings JSON store"
    )]
    pub settings_path: PathBuf,

    /// Path to the durable user-preference store (JSON file).
    #[structopt(
        long,
        env = "DB_PATH",
        default_value = "voicecast.db.json",
        help = "Path to the user preference JSON store"
    )]
    pub db_path: PathBuf,

    /// Base URL of the primary TTS provider.
    #[structopt(
        long,
        env = "PRIMARY_TTS_URL",
        help = "Base URL of the primary TTS provider"
    )]
    pub primary_tts_url: Option<url::Url>,

    /// Base URL of the fallback (translator) TTS provider.
    #[structopt(
        long,
        env = "FALLBACK_TTS_URL",
        help = "Base URL of the fallback TTS provider"
    )]
    pub fallback_tts_url: Option<url::Url>,

    /// Platform (chat/voice SDK) bot token.
    #[structopt(
        long,
        env = "PLATFORM_TOKEN",
        help = "Chat/voice platform bot token"
    )]
    pub platform_token: Option<String>,
}

impl Opts {
    /// Parses CLI [`Opts`] from command line arguments.
    ///
    /// Prints the error message and quits the program in case of failure.
    #[inline]
    #[must_use]
    pub fn from_args() -> Self {
        <Self as StructOpt>::from_args()
    }

    /// Parses [`slog::Level`] from the given string.
    ///
    /// This function is required, because [`slog::Level`]'s [`FromStr`]
    /// implementation returns `()`, which is not [`Display`] as
    /// [`StructOpt`] requires.
    ///
    /// # Errors
    ///
    /// If [`slog::Level`] failed to parse from the string.
    ///
    /// [`Display`]: std::fmt::Display
    /// [`FromStr`]: std::str::FromStr
    pub fn parse_log_level(lvl: &str) -> Result<slog::Level, anyhow::Error> {
        #[allow(clippy::map_err_ignore)]
        slog::Level::from_str(lvl).map_err(|_| {
            anyhow!(
                "'{}' is invalid verbosity level, allowed levels are: \
                 OFF | CRIT | ERRO | WARN | INFO | DEBG | TRCE",
                lvl,
            )
        })
    }

    /// Parses a comma-separated list of channel IDs, ignoring blank and
    /// unparsable entries.
    fn parse_channel_allowlist(raw: &str) -> Vec<u64> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

/// Error type indicating non-zero process exit code.
pub struct Failure;

impl fmt::Debug for Failure {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "")
    }
}

impl From<()> for Failure {
    #[inline]
    fn from(_: ()) -> Self {
        Self
    }
}

impl From<anyhow::Error> for Failure {
    #[inline]
    fn from(err: anyhow::Error) -> Self {
        voicecast_log::log::crit!("Fatal error"; "error" => ?err);
        Self
    }
}
