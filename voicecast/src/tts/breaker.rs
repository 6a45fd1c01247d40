//! Per-provider circuit breakers and per-voice failure cooldowns.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::error::CoreError;

/// Consecutive-failure threshold and reset window for one provider.
#[derive(Clone, Copy, Debug)]
struct BreakerConfig {
    threshold: u32,
    reset: Duration,
}

/// State of a single circuit breaker.
#[derive(Clone, Copy, Debug, Default)]
struct BreakerState {
    failures: u32,
    open_until: Option<Instant>,
}

/// A circuit breaker guarding calls to one TTS provider.
#[derive(Debug)]
pub struct Breaker {
    name: &'static str,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl Breaker {
    fn new(name: &'static str, threshold: u32, reset: Duration) -> Self {
        Self {
            name,
            config: BreakerConfig { threshold, reset },
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Creates the breaker guarding the primary provider: 3 failures / 60s.
    #[must_use]
    pub fn primary() -> Self {
        Self::new("primary", 3, Duration::from_secs(60))
    }

    /// Creates the breaker guarding the fallback provider: 5 failures / 30s.
    #[must_use]
    pub fn fallback() -> Self {
        Self::new("fallback", 5, Duration::from_secs(30))
    }

    /// Runs `op` under this breaker, failing fast with
    /// [`CoreError::BreakerOpen`] while the breaker is tripped.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        CoreError: From<E>,
    {
        let now = Instant::now();
        {
            let state = self.state.lock().expect("breaker lock poisoned");
            if let Some(open_until) = state.open_until {
                if now < open_until {
                    return Err(CoreError::BreakerOpen(self.name));
                }
            }
        }

        match op().await {
            Ok(val) => {
                let mut state = self.state.lock().expect("breaker lock poisoned");
                state.failures = 0;
                state.open_until = None;
                Ok(val)
            }
            Err(err) => {
                let mut state = self.state.lock().expect("breaker lock poisoned");
                state.failures += 1;
                if state.failures >= self.config.threshold {
                    state.open_until = Some(now + self.config.reset);
                }
                Err(CoreError::from(err))
            }
        }
    }

    /// Returns `true` if this breaker is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().expect("breaker lock poisoned");
        matches!(state.open_until, Some(until) if Instant::now() < until)
    }
}

/// Per-voice consecutive-failure threshold before a cooldown is imposed.
const VOICE_FAILURE_THRESHOLD: u32 = 3;

/// Cooldown duration imposed on a voice once [`VOICE_FAILURE_THRESHOLD`] is
/// reached.
const VOICE_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, Default)]
struct VoiceState {
    failures: u32,
    cooldown_until: Option<Instant>,
}

/// Tracks per-voice consecutive failures independently of provider
/// breakers, imposing a cooldown once a voice fails repeatedly.
#[derive(Debug, Default)]
pub struct VoiceHealth {
    voices: Mutex<HashMap<String, VoiceState>>,
}

impl VoiceHealth {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `voice_id`, possibly starting its cooldown.
    pub fn mark_failed(&self, voice_id: &str) {
        let mut voices = self.voices.lock().expect("voice health lock poisoned");
        let entry = voices.entry(voice_id.to_owned()).or_default();
        entry.failures += 1;
        if entry.failures >= VOICE_FAILURE_THRESHOLD {
            entry.cooldown_until = Some(Instant::now() + VOICE_COOLDOWN);
        }
    }

    /// Records a success for `voice_id`, decrementing its failure count
    /// with a floor of zero and clearing any cooldown once it reaches
    /// zero.
    pub fn mark_success(&self, voice_id: &str) {
        let mut voices = self.voices.lock().expect("voice health lock poisoned");
        if let Some(entry) = voices.get_mut(voice_id) {
            entry.failures = entry.failures.saturating_sub(1);
            if entry.failures == 0 {
                entry.cooldown_until = None;
            }
        }
    }

    /// Returns `true` if `voice_id` is not presently on cooldown.
    ///
    /// Clears expired cooldowns as a side effect.
    #[must_use]
    pub fn is_available(&self, voice_id: &str) -> bool {
        let mut voices = self.voices.lock().expect("voice health lock poisoned");
        if let Some(entry) = voices.get_mut(voice_id) {
            if let Some(until) = entry.cooldown_until {
                if Instant::now() >= until {
                    entry.failures = 0;
                    entry.cooldown_until = None;
                }
            }
            entry.failures < VOICE_FAILURE_THRESHOLD
        } else {
            true
        }
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    #[tokio::test]
    async fn breaker_opens_after_threshold_failures() {
        let breaker = Breaker::new("test", 3, Duration::from_secs(60));
        for _ in 0..3 {
            let res: Result<(), CoreError> =
                breaker.execute(|| async { Err::<(), _>(CoreError::Other("x".into())) }).await;
            assert!(res.is_err());
        }
        assert!(breaker.is_open());
        let res: Result<(), CoreError> =
            breaker.execute(|| async { Ok::<_, CoreError>(()) }).await;
        assert!(matches!(res, Err(CoreError::BreakerOpen(_))));
    }

    #[tokio::test]
    async fn breaker_resets_failure_count_on_success() {
        let breaker = Breaker::new("test", 3, Duration::from_secs(60));
        let _: Result<(), CoreError> =
            breaker.execute(|| async { Err::<(), _>(CoreError::Other("x".into())) }).await;
        let _: Result<(), CoreError> =
            breaker.execute(|| async { Ok::<_, CoreError>(()) }).await;
        assert!(!breaker.is_open());
    }

    #[test]
    fn voice_health_imposes_cooldown_after_three_failures() {
        let health = VoiceHealth::new();
        assert!(health.is_available("v"));
        health.mark_failed("v");
        health.mark_failed("v");
        assert!(health.is_available("v"));
        health.mark_failed("v");
        assert!(!health.is_available("v"));
    }

    #[test]
    fn voice_health_success_decrements_with_floor() {
        let health = VoiceHealth::new();
        health.mark_failed("v");
        health.mark_failed("v");
        health.mark_success("v");
        health.mark_success("v");
        health.mark_success("v");
        assert!(health.is_available("v"));
    }
}
