//! Streaming TTS pipeline: provider breakers, incremental decoding, and
//! the two-provider fallback algorithm.

pub mod breaker;
pub mod decode;
pub mod pipeline;
pub mod provider;

pub use self::pipeline::{AudioStream, TtsClient};
