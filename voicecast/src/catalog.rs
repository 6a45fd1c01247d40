//! Static catalog of known TTS voice IDs and provider routing.
//!
//! The catalog is a constant table, not reconfigurable per tenant beyond
//! the `allowed_voice_ids` allowlist in [`crate::settings`].

use once_cell::sync::Lazy;

/// Prefix marking a voice ID as belonging to the fallback (translator)
/// provider rather than the primary one.
pub const FALLBACK_PROVIDER_PREFIX: &str = "g-";

/// Well-known voices shipped with every deployment, primary provider first.
static VOICES: Lazy<Vec<Voice>> = Lazy::new(|| {
    vec![
        Voice::new("en_us_001", "English (US) - Female 1"),
        Voice::new("en_us_006", "English (US) - Male 1"),
        Voice::new("en_us_009", "English (US) - Male 2"),
        Voice::new("en_us_010", "English (US) - Female 2"),
        Voice::new("en_uk_001", "English (UK) - Male 1"),
        Voice::new("en_uk_003", "English (UK) - Male 2"),
        Voice::new("en_au_001", "English (AU) - Female"),
        Voice::new("g-en", "English (fallback)"),
        Voice::new("g-en-au", "English AU (fallback)"),
        Voice::new("g-en-uk", "English UK (fallback)"),
    ]
});

/// A single entry in the voice catalog.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Voice {
    /// Opaque voice identifier, as accepted by the TTS providers.
    pub id: String,

    /// Human-readable label shown in the control plane.
    pub label: String,
}

impl Voice {
    fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_owned(),
            label: label.to_owned(),
        }
    }
}

/// Returns the full static voice catalog.
#[must_use]
pub fn all() -> &'static [Voice] {
    &VOICES
}

/// Returns `true` if `voice_id` names a known voice.
#[must_use]
pub fn is_known(voice_id: &str) -> bool {
    VOICES.iter().any(|v| v.id == voice_id)
}

/// Returns the ID of the first catalog voice that is not `exclude`.
///
/// # Panics
///
/// Panics if the catalog is empty or consists solely of `exclude`, which
/// would indicate a misconfigured deployment.
#[must_use]
pub fn first_other_than(exclude: &str) -> &'static str {
    VOICES
        .iter()
        .map(|v| v.id.as_str())
        .find(|id| *id != exclude)
        .expect("voice catalog must contain more than one voice")
}

/// Returns `true` if `voice_id` is routed to the fallback (translator)
/// provider rather than the primary one.
#[must_use]
pub fn is_fallback_provider_voice(voice_id: &str) -> bool {
    voice_id.starts_with(FALLBACK_PROVIDER_PREFIX)
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn catalog_is_non_empty_and_unique() {
        let all = all();
        assert!(!all.is_empty());
        let mut ids: Vec<_> = all.iter().map(|v| v.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), all.len());
    }

    #[test]
    fn fallback_prefix_routes_correctly() {
        assert!(is_fallback_provider_voice("g-en"));
        assert!(!is_fallback_provider_voice("en_us_001"));
    }

    #[test]
    fn first_other_than_excludes_given_voice() {
        let other = first_other_than("en_us_001");
        assert_ne!(other, "en_us_001");
    }
}
