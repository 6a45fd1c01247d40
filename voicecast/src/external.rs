//! Opaque external text-generation collaborators backing the
//! radio-presenter intro and song-suggestion control plane endpoints.
//!
//! Both providers are treated as black boxes: the core only needs a
//! string in, string out contract, with a static fallback when the
//! provider is unavailable.

use async_trait::async_trait;

/// A text-generation collaborator (a large-language-model-backed intro
/// writer or song suggester).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates text for `prompt`.
    ///
    /// # Errors
    ///
    /// If the underlying provider is unreachable or errors.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Generates `generator`'s output for `prompt`, using `fallback` if the
/// provider fails.
pub async fn generate_with_fallback(
    generator: Option<&(dyn TextGenerator)>,
    prompt: &str,
    fallback: &str,
) -> String {
    match generator {
        Some(generator) => generator
            .generate(prompt)
            .await
            .unwrap_or_else(|_| fallback.to_owned()),
        None => fallback.to_owned(),
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    struct Failing;

    #[async_trait]
    impl TextGenerator for Failing {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("provider down"))
        }
    }

    #[tokio::test]
    async fn falls_back_when_provider_fails() {
        let text = generate_with_fallback(Some(&Failing), "hi", "fallback text").await;
        assert_eq!(text, "fallback text");
    }

    #[tokio::test]
    async fn falls_back_when_no_provider_configured() {
        let text = generate_with_fallback(None, "hi", "fallback text").await;
        assert_eq!(text, "fallback text");
    }
}
