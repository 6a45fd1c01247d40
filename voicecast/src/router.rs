//! Effective-voice resolution and chat auto-read translation from
//! platform events into queue operations.

use crate::{catalog, settings::GuildSettings};

/// Resolves the voice that should actually be used for an utterance,
/// applying the tenant's allowlist, the reserved-default policy, and the
/// fallback voice.
///
/// `allow_default` is `true` for announcements (greet/farewell, explicit
/// `/tts` without a voice) which may legitimately use the tenant's
/// reserved `default_voice_id`, and `false` for ordinary chat auto-read
/// (where the default voice is reserved and never assigned implicitly).
#[must_use]
pub fn effective_voice(
    settings: &GuildSettings,
    requested: Option<&str>,
    allow_default: bool,
) -> String {
    let default = settings.default_voice_id.as_str();
    let fallback = settings.fallback_voice.as_str();
    let user_default = || {
        if fallback != default {
            fallback.to_owned()
        } else {
            catalog::first_other_than(default).to_owned()
        }
    };

    let mut requested = match requested.filter(|v| !v.is_empty()) {
        Some(v) => v.to_owned(),
        None => {
            return if allow_default {
                default.to_owned()
            } else {
                user_default()
            };
        }
    };

    if !allow_default && requested == default {
        requested = user_default();
    }

    if !settings.restrict_voices {
        return requested;
    }

    let allowed = &settings.allowed_voice_ids;
    if allowed.iter().any(|v| v == &requested) {
        return requested;
    }

    if allow_default {
        if allowed.iter().any(|v| v == default) {
            return default.to_owned();
        }
        if allowed.iter().any(|v| v == fallback) {
            return fallback.to_owned();
        }
        requested
    } else {
        let ud = user_default();
        if allowed.iter().any(|v| v == &ud) {
            return ud;
        }
        if let Some(v) = allowed.iter().find(|v| v.as_str() != default) {
            return v.clone();
        }
        if allowed.iter().any(|v| v == default) {
            return default.to_owned();
        }
        requested
    }
}

/// Classification of a chat message for auto-read purposes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    /// A message carrying an image attachment/embed.
    Image,
    /// A message carrying a video attachment/embed.
    Video,
    /// A plain text message containing a URL.
    Link,
    /// Ordinary text content.
    Text,
}

/// Builds the text to be read aloud for a chat auto-read event.
///
/// `speak_name` is the author's saved nickname, falling back to their
/// platform display name. `last_speaker` is the guild session's
/// currently-tracked last speaker; when it matches `author_id`, the
/// attribution prefix is omitted so consecutive messages from the same
/// user read naturally.
#[must_use]
pub fn build_auto_read_text(
    kind: MessageKind,
    speak_name: &str,
    content: &str,
    author_id: u64,
    last_speaker: Option<u64>,
) -> String {
    match kind {
        MessageKind::Image => format!("{} posted an image", speak_name),
        MessageKind::Video => format!("{} posted a video", speak_name),
        MessageKind::Link => format!("{} posted a link", speak_name),
        MessageKind::Text => {
            if last_speaker == Some(author_id) {
                content.to_owned()
            } else {
                format!(r#"{} said. "{}""#, speak_name, content)
            }
        }
    }
}

/// Classifies a message by its content/attachments for auto-read
/// purposes.
#[must_use]
pub fn classify_message(
    has_image: bool,
    has_video: bool,
    content: &str,
) -> MessageKind {
    if has_image {
        MessageKind::Image
    } else if has_video {
        MessageKind::Video
    } else if crate::textutil::contains_url(content) {
        MessageKind::Link
    } else {
        MessageKind::Text
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    fn settings() -> GuildSettings {
        GuildSettings::default()
    }

    #[test]
    fn empty_request_with_default_allowed_uses_default() {
        let s = settings();
        assert_eq!(effective_voice(&s, None, true), s.default_voice_id);
    }

    #[test]
    fn empty_request_without_default_uses_user_default() {
        let s = settings();
        let voice = effective_voice(&s, None, false);
        assert_ne!(voice, s.default_voice_id);
    }

    #[test]
    fn requesting_default_without_allow_default_is_substituted() {
        let s = settings();
        let voice = effective_voice(&s, Some(&s.default_voice_id.clone()), false);
        assert_ne!(voice, s.default_voice_id);
    }

    #[test]
    fn unrestricted_returns_the_request_verbatim() {
        let s = settings();
        assert_eq!(effective_voice(&s, Some("some_voice"), true), "some_voice");
    }

    #[test]
    fn restricted_prefers_default_then_fallback_for_announcements() {
        let mut s = settings();
        s.restrict_voices = true;
        s.allowed_voice_ids = vec![s.fallback_voice.clone()];
        let voice = effective_voice(&s, Some("unknown_voice"), true);
        assert_eq!(voice, s.fallback_voice);
    }

    #[test]
    fn restricted_is_total_even_when_nothing_matches() {
        let mut s = settings();
        s.restrict_voices = true;
        s.allowed_voice_ids = vec!["only_this".to_owned()];
        let voice = effective_voice(&s, Some("unknown_voice"), true);
        assert!(!voice.is_empty());
    }

    #[test]
    fn attribution_prefix_omitted_for_consecutive_same_speaker() {
        let text = build_auto_read_text(
            MessageKind::Text,
            "Ada",
            "hello again",
            42,
            Some(42),
        );
        assert_eq!(text, "hello again");

        let text =
            build_auto_read_text(MessageKind::Text, "Ada", "hello", 42, Some(7));
        assert_eq!(text, r#"Ada said. "hello""#);
    }

    #[test]
    fn classification_prefers_attachments_over_url_detection() {
        assert_eq!(
            classify_message(true, false, "see https://x.test"),
            MessageKind::Image
        );
        assert_eq!(classify_message(false, false, "plain text"), MessageKind::Text);
        assert_eq!(
            classify_message(false, false, "https://x.test"),
            MessageKind::Link
        );
    }
}
