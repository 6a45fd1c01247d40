//! Streaming TTS pipeline: provider fallback, retries, and the byte
//! stream handed to the audio sink.

use std::{sync::Arc, time::Duration};

use futures::StreamExt as _;
use tokio::sync::mpsc;

use crate::{
    backoff::retry_with_backoff,
    catalog,
    error::CoreError,
    tts::{
        breaker::{self, Breaker},
        decode::JsonAudioDecoder,
        provider,
    },
};

/// Bound on the channel between the producer task and the reader handle.
const CHANNEL_CAPACITY: usize = 32;

/// Shared collaborators needed to open a TTS stream.
#[derive(Debug)]
pub struct TtsClient {
    http: reqwest::Client,
    primary_url: Option<url::Url>,
    fallback_url: Option<url::Url>,
    primary_breaker: Breaker,
    fallback_breaker: Breaker,
    voice_health: breaker::VoiceHealth,
    max_retries: u32,
}

impl TtsClient {
    /// Builds a new client from configuration.
    #[must_use]
    pub fn new(
        primary_url: Option<url::Url>,
        fallback_url: Option<url::Url>,
        http_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            http: provider::build_client(http_timeout),
            primary_url,
            fallback_url,
            primary_breaker: Breaker::primary(),
            fallback_breaker: Breaker::fallback(),
            voice_health: breaker::VoiceHealth::new(),
            max_retries,
        }
    }

    /// Returns `true` if `voice_id` is presently on cooldown.
    #[must_use]
    pub fn voice_on_cooldown(&self, voice_id: &str) -> bool {
        !self.voice_health.is_available(voice_id)
    }

    /// Opens a streaming TTS request for `text`, preferring
    /// `requested_voice` and falling back to `fallback_voice` per the
    /// provider/voice fallback algorithm.
    ///
    /// Returns a reader handle and the handle of the background task
    /// producing bytes into it; the caller should await the task after
    /// consuming the reader to observe the final outcome.
    pub fn get_tts_stream(
        self: &Arc<Self>,
        text: String,
        requested_voice: String,
        fallback_voice: String,
    ) -> (AudioStream, tokio::task::JoinHandle<Result<(), CoreError>>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_pipeline(text, requested_voice, fallback_voice, tx)
                .await
        });
        (AudioStream::new(rx), handle)
    }

    async fn run_pipeline(
        &self,
        text: String,
        requested_voice: String,
        fallback_voice: String,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), CoreError> {
        let voice = if self.voice_on_cooldown(&requested_voice) {
            fallback_voice.clone()
        } else {
            requested_voice
        };

        // Route to whichever provider actually owns `voice`, rather than
        // always trying primary first: `fallback_voice` (and therefore
        // the common on-cooldown substitution above) is itself usually a
        // fallback-provider voice.
        let primary_attempt = self.try_voice(&text, &voice, &tx).await;
        let primary_err = match primary_attempt {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if !catalog::is_fallback_provider_voice(&voice) {
            let translator_voice = translator_voice_for(&voice);
            if let Ok(()) = self.try_fallback(&text, &translator_voice, &tx).await {
                return Ok(());
            }
        }

        if voice != fallback_voice && self.try_voice(&text, &fallback_voice, &tx).await.is_ok() {
            return Ok(());
        }

        Err(primary_err)
    }

    /// Dispatches to [`Self::try_primary`] or [`Self::try_fallback`]
    /// according to `voice`'s own provider prefix.
    async fn try_voice(
        &self,
        text: &str,
        voice: &str,
        tx: &mpsc::Sender<Vec<u8>>,
    ) -> Result<(), CoreError> {
        if catalog::is_fallback_provider_voice(voice) {
            self.try_fallback(text, voice, tx).await
        } else {
            self.try_primary(text, voice, tx).await
        }
    }

    async fn try_primary(
        &self,
        text: &str,
        voice: &str,
        tx: &mpsc::Sender<Vec<u8>>,
    ) -> Result<(), CoreError> {
        let url = self
            .primary_url
            .as_ref()
            .ok_or_else(|| CoreError::Other("primary TTS provider not configured".into()))?;

        let max_retries = self.max_retries;
        let result = self
            .primary_breaker
            .execute(|| {
                retry_with_backoff(max_retries, || {
                    provider::request_primary(&self.http, url, text, voice)
                })
            })
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                if provider::is_server_failure(&err) {
                    self.voice_health.mark_failed(voice);
                }
                return Err(err);
            }
        };

        let outcome = stream_primary_body(resp, tx).await;
        if outcome.is_ok() {
            self.voice_health.mark_success(voice);
        } else {
            self.voice_health.mark_failed(voice);
        }
        outcome
    }

    async fn try_fallback(
        &self,
        text: &str,
        voice: &str,
        tx: &mpsc::Sender<Vec<u8>>,
    ) -> Result<(), CoreError> {
        let url = self
            .fallback_url
            .as_ref()
            .ok_or_else(|| CoreError::Other("fallback TTS provider not configured".into()))?;

        let max_retries = self.max_retries;
        let result = self
            .fallback_breaker
            .execute(|| {
                retry_with_backoff(max_retries, || {
                    provider::request_fallback(&self.http, url, text)
                })
            })
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                if provider::is_server_failure(&err) {
                    self.voice_health.mark_failed(voice);
                }
                return Err(err);
            }
        };

        let outcome = stream_fallback_body(resp, tx).await;
        if outcome.is_ok() {
            self.voice_health.mark_success(voice);
        } else {
            self.voice_health.mark_failed(voice);
        }
        outcome
    }
}

/// Maps a primary-provider voice ID to its nearest fallback-provider
/// equivalent, defaulting to the generic English fallback voice.
fn translator_voice_for(_primary_voice: &str) -> String {
    "g-en".to_owned()
}

async fn stream_primary_body(
    resp: reqwest::Response,
    tx: &mpsc::Sender<Vec<u8>>,
) -> Result<(), CoreError> {
    let mut decoder = JsonAudioDecoder::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| CoreError::Other(err.to_string()))?;
        let decoded = decoder.feed(&chunk)?;
        if !decoded.is_empty() && tx.send(decoded).await.is_err() {
            return Ok(());
        }
        if decoder.is_done() {
            return Ok(());
        }
    }
    if decoder.is_done() {
        Ok(())
    } else {
        Err(CoreError::ParseError)
    }
}

async fn stream_fallback_body(
    resp: reqwest::Response,
    tx: &mpsc::Sender<Vec<u8>>,
) -> Result<(), CoreError> {
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| CoreError::Other(err.to_string()))?;
        if tx.send(chunk.to_vec()).await.is_err() {
            return Ok(());
        }
    }
    Ok(())
}

/// A readable handle over a producer task's decoded audio bytes.
#[derive(Debug)]
pub struct AudioStream {
    rx: mpsc::Receiver<Vec<u8>>,
    leftover: Vec<u8>,
}

impl AudioStream {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            leftover: Vec::new(),
        }
    }

    /// Reads up to `want` bytes, blocking until some are available or the
    /// stream has ended. Returns an empty [`Vec`] at end-of-stream.
    pub async fn read(&mut self, want: usize) -> Vec<u8> {
        if self.leftover.is_empty() {
            match self.rx.recv().await {
                Some(chunk) => self.leftover = chunk,
                None => return Vec::new(),
            }
        }
        if self.leftover.len() <= want {
            std::mem::take(&mut self.leftover)
        } else {
            self.leftover.drain(..want).collect()
        }
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn translator_voice_defaults_to_generic_english() {
        assert_eq!(translator_voice_for("en_us_001"), "g-en");
    }

    #[tokio::test]
    async fn audio_stream_reassembles_across_small_reads() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(b"Hello, World!".to_vec()).await.unwrap();
        drop(tx);
        let mut stream = AudioStream::new(rx);
        let mut out = Vec::new();
        loop {
            let chunk = stream.read(4).await;
            if chunk.is_empty() {
                break;
            }
            out.extend(chunk);
        }
        assert_eq!(out, b"Hello, World!");
    }
}
