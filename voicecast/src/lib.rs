//! Multi-tenant voice broadcast orchestrator: per-tenant session state
//! machine, utterance queue, streaming TTS pipeline with provider
//! fallback, and an HTTP/WS control plane.

#![deny(
    broken_intra_doc_links,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![warn(
    deprecated_in_future,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]

pub mod api;
pub mod backoff;
pub mod catalog;
pub mod cli;
pub mod context;
pub mod error;
pub mod external;
pub mod logbuf;
pub mod persist;
pub mod platform;
pub mod queue;
pub mod router;
pub mod serde_util;
pub mod server;
pub mod session;
pub mod settings;
pub mod textutil;
pub mod tts;
pub mod userprefs;

use std::any::Any;

pub use self::context::AppContext;

/// Runs the application.
///
/// # Errors
///
/// If running has failed and could not be performed. The appropriate error
/// is logged.
pub fn run() -> Result<(), cli::Failure> {
    let cfg = cli::Opts::from_args();

    let level = if cfg.debug {
        voicecast_log::slog::Level::Debug
    } else {
        cfg.log_level
    };

    // This guard should be held till the end of the program for the logger
    // to present in global context.
    std::mem::forget(voicecast_log::init(Some(level)));

    server::run(cfg)
}

/// Interprets given [panic payload][1] as displayable message.
///
/// [1]: std::panic::PanicInfo::payload
#[must_use]
pub fn display_panic<'a>(err: &'a (dyn Any + Send + 'static)) -> &'a str {
    if let Some(s) = err.downcast_ref::<&str>() {
        return s;
    }
    if let Some(s) = err.downcast_ref::<String>() {
        return s.as_str();
    }
    "Box<Any>"
}
