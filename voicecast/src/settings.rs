//! Per-tenant validated settings: schema, coercion, and a write-through
//! cache backed by an atomically-persisted JSON file.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Mutex,
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smart_default::SmartDefault;

use crate::{error::CoreError, persist};

/// Maximum number of entries accepted in `allowed_voice_ids`.
const MAX_ALLOWED_VOICES: usize = 500;

/// Maximum number of entries accepted in `allowlist_text_channel_ids`.
const MAX_ALLOWLISTED_CHANNELS: usize = 200;

static TRUTHY: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["1", "true", "yes", "y", "on"].iter().copied().collect());

static FALSY: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["0", "false", "no", "n", "off"].iter().copied().collect());

/// Validated, per-tenant settings record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct GuildSettings {
    /// Maximum characters synthesized for a single utterance, 1..=2000.
    #[default = 500]
    pub max_tts_chars: u32,

    /// Voice used whenever the requested or default voice is unavailable.
    #[default(String::from("g-en"))]
    pub fallback_voice: String,

    /// The tenant's reserved "server voice" used for announcements.
    #[default(String::from("en_us_001"))]
    pub default_voice_id: String,

    /// Whether ordinary chat messages are read aloud.
    pub auto_read_messages: bool,

    /// Whether the bot leaves a channel once no non-bot members remain.
    #[default = true]
    pub leave_when_alone: bool,

    /// Whether a greeting is played when a user joins the bot's channel.
    pub greet_on_join: bool,

    /// Whether a farewell is played when a user leaves the bot's channel.
    pub farewell_on_leave: bool,

    /// Whether `allowed_voice_ids` restricts which voices may be used.
    pub restrict_voices: bool,

    /// Voices permitted when `restrict_voices` is set.
    pub allowed_voice_ids: Vec<String>,

    /// Text channel IDs treated as voice chat text surfaces.
    pub allowlist_text_channel_ids: Vec<u64>,
}

impl GuildSettings {
    /// Validates this record's invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValidationError`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(1..=2000).contains(&self.max_tts_chars) {
            return Err(field_error(
                "max_tts_chars",
                "must be between 1 and 2000",
            ));
        }
        if self.fallback_voice.trim().is_empty() {
            return Err(field_error("fallback_voice", "must not be empty"));
        }
        if self.default_voice_id.trim().is_empty() {
            return Err(field_error("default_voice_id", "must not be empty"));
        }
        if self.allowed_voice_ids.len() > MAX_ALLOWED_VOICES {
            return Err(field_error(
                "allowed_voice_ids",
                "must not exceed 500 entries",
            ));
        }
        if has_duplicates(&self.allowed_voice_ids) {
            return Err(field_error("allowed_voice_ids", "must be unique"));
        }
        if self.allowlist_text_channel_ids.len() > MAX_ALLOWLISTED_CHANNELS {
            return Err(field_error(
                "allowlist_text_channel_ids",
                "must not exceed 200 entries",
            ));
        }
        if has_duplicates(&self.allowlist_text_channel_ids) {
            return Err(field_error(
                "allowlist_text_channel_ids",
                "must be unique",
            ));
        }
        if self.restrict_voices {
            if self.allowed_voice_ids.is_empty() {
                return Err(field_error(
                    "allowed_voice_ids",
                    "must not be empty while restrict_voices is set",
                ));
            }
            if !self.allowed_voice_ids.contains(&self.fallback_voice) {
                return Err(field_error(
                    "allowed_voice_ids",
                    "must include fallback_voice while restrict_voices is set",
                ));
            }
            if !self.allowed_voice_ids.contains(&self.default_voice_id) {
                return Err(field_error(
                    "allowed_voice_ids",
                    "must include default_voice_id while restrict_voices is set",
                ));
            }
        }
        Ok(())
    }
}

fn has_duplicates<T: Eq + std::hash::Hash>(items: &[T]) -> bool {
    let mut seen = HashSet::with_capacity(items.len());
    !items.iter().all(|item| seen.insert(item))
}

fn field_error(field: &str, reason: &str) -> CoreError {
    CoreError::ValidationError {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Applies a raw JSON patch onto `base`, coercing loosely-typed values
/// (truthy/falsy strings for booleans, JSON-encoded strings for lists)
/// the way the original settings editor did.
///
/// # Errors
///
/// Returns [`CoreError::UnknownSetting`] for keys that do not name a
/// field, and [`CoreError::ValidationError`] when a value cannot be
/// coerced into the field's type.
pub fn apply_patch(
    base: &GuildSettings,
    patch: &HashMap<String, Value>,
) -> Result<GuildSettings, CoreError> {
    let mut out = base.clone();
    for (key, value) in patch {
        match key.as_str() {
            "max_tts_chars" => out.max_tts_chars = coerce_u32(key, value)?,
            "fallback_voice" => out.fallback_voice = coerce_string(key, value)?,
            "default_voice_id" => {
                out.default_voice_id = coerce_string(key, value)?;
            }
            "auto_read_messages" => {
                out.auto_read_messages = coerce_bool(key, value)?;
            }
            "leave_when_alone" => out.leave_when_alone = coerce_bool(key, value)?,
            "greet_on_join" => out.greet_on_join = coerce_bool(key, value)?,
            "farewell_on_leave" => {
                out.farewell_on_leave = coerce_bool(key, value)?;
            }
            "restrict_voices" => out.restrict_voices = coerce_bool(key, value)?,
            "allowed_voice_ids" => {
                out.allowed_voice_ids = coerce_string_list(key, value)?;
            }
            "allowlist_text_channel_ids" => {
                out.allowlist_text_channel_ids = coerce_u64_list(key, value)?;
            }
            _ => return Err(CoreError::UnknownSetting(key.clone())),
        }
    }
    Ok(out)
}

fn coerce_bool(field: &str, value: &Value) -> Result<bool, CoreError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => {
            let lower = s.to_lowercase();
            if TRUTHY.contains(lower.as_str()) {
                Ok(true)
            } else if FALSY.contains(lower.as_str()) {
                Ok(false)
            } else {
                Err(field_error(field, "is not a recognized boolean value"))
            }
        }
        _ => Err(field_error(field, "must be a boolean")),
    }
}

fn coerce_u32(field: &str, value: &Value) -> Result<u32, CoreError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| field_error(field, "must be a non-negative integer")),
        Value::String(s) => s
            .parse()
            .map_err(|_| field_error(field, "must be a non-negative integer")),
        _ => Err(field_error(field, "must be an integer")),
    }
}

fn coerce_string(field: &str, value: &Value) -> Result<String, CoreError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        _ => Err(field_error(field, "must be a string")),
    }
}

fn coerce_string_list(
    field: &str,
    value: &Value,
) -> Result<Vec<String>, CoreError> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| coerce_string(field, v))
            .collect::<Result<_, _>>(),
        Value::String(s) => serde_json::from_str(s)
            .map_err(|_| field_error(field, "must be a JSON array of strings")),
        _ => Err(field_error(field, "must be a list of strings")),
    }
}

fn coerce_u64_list(field: &str, value: &Value) -> Result<Vec<u64>, CoreError> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .ok_or_else(|| field_error(field, "must contain integers"))
            })
            .collect::<Result<_, _>>(),
        Value::String(s) => serde_json::from_str(s)
            .map_err(|_| field_error(field, "must be a JSON array of integers")),
        _ => Err(field_error(field, "must be a list of integers")),
    }
}

/// Write-through, in-process cache of [`GuildSettings`], one file per
/// process, one record per tenant.
///
/// A single global lock serializes all reads and writes: contention is
/// expected to be low, and this guarantees a concurrent `get` observes
/// either the prior or the new record, never a half-applied merge.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    records: Mutex<HashMap<u64, GuildSettings>>,
}

impl SettingsStore {
    /// Loads the settings store from `path`, creating an empty table if
    /// the file does not yet exist.
    ///
    /// # Errors
    ///
    /// If the file exists but could not be read or parsed.
    pub async fn load(path: PathBuf) -> anyhow::Result<Self> {
        let records = persist::read_json_or_default(&path).await?;
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Returns the tenant's settings, creating and persisting a default
    /// record on first access.
    ///
    /// # Errors
    ///
    /// If persisting a newly-created default record fails.
    pub async fn get(&self, guild_id: u64) -> anyhow::Result<GuildSettings> {
        let existing = {
            let records = self.records.lock().expect("settings lock poisoned");
            records.get(&guild_id).cloned()
        };
        if let Some(settings) = existing {
            return Ok(settings);
        }
        let default = GuildSettings::default();
        self.persist(guild_id, default.clone()).await?;
        Ok(default)
    }

    /// Merges `patch` over the tenant's current settings, validates the
    /// result, persists it, and updates the cache.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] wrapped in [`anyhow::Error`] if the patch
    /// is invalid, or an I/O error if persistence fails.
    pub async fn update(
        &self,
        guild_id: u64,
        patch: &HashMap<String, Value>,
    ) -> anyhow::Result<GuildSettings> {
        let current = self.get(guild_id).await?;
        let updated = apply_patch(&current, patch)?;
        updated.validate()?;
        self.persist(guild_id, updated.clone()).await?;
        Ok(updated)
    }

    async fn persist(
        &self,
        guild_id: u64,
        settings: GuildSettings,
    ) -> anyhow::Result<()> {
        let snapshot = {
            let mut records = self.records.lock().expect("settings lock poisoned");
            records.insert(guild_id, settings);
            records.clone()
        };
        persist::write_json_atomic(&self.path, snapshot).await
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert!(GuildSettings::default().validate().is_ok());
    }

    #[test]
    fn restrict_voices_requires_nonempty_allowlist() {
        let mut settings = GuildSettings::default();
        settings.restrict_voices = true;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn restrict_voices_requires_default_and_fallback_present() {
        let mut settings = GuildSettings::default();
        settings.restrict_voices = true;
        settings.allowed_voice_ids = vec!["some_other_voice".to_owned()];
        assert!(settings.validate().is_err());

        settings.allowed_voice_ids = vec![
            settings.default_voice_id.clone(),
            settings.fallback_voice.clone(),
        ];
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn coerces_truthy_and_falsy_strings() {
        let base = GuildSettings::default();
        let mut patch = HashMap::new();
        patch.insert(
            "auto_read_messages".to_owned(),
            Value::String("Yes".to_owned()),
        );
        let updated = apply_patch(&base, &patch).unwrap();
        assert!(updated.auto_read_messages);

        patch.insert(
            "auto_read_messages".to_owned(),
            Value::String("off".to_owned()),
        );
        let updated = apply_patch(&base, &patch).unwrap();
        assert!(!updated.auto_read_messages);
    }

    #[test]
    fn coerces_json_string_lists() {
        let base = GuildSettings::default();
        let mut patch = HashMap::new();
        patch.insert(
            "allowed_voice_ids".to_owned(),
            Value::String(r#"["a","b"]"#.to_owned()),
        );
        let updated = apply_patch(&base, &patch).unwrap();
        assert_eq!(updated.allowed_voice_ids, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let base = GuildSettings::default();
        let mut patch = HashMap::new();
        patch.insert("nonexistent".to_owned(), Value::Bool(true));
        assert!(matches!(
            apply_patch(&base, &patch),
            Err(CoreError::UnknownSetting(_))
        ));
    }

    #[test]
    fn duplicate_allowed_voice_ids_rejected() {
        let mut settings = GuildSettings::default();
        settings.allowed_voice_ids = vec!["a".to_owned(), "a".to_owned()];
        assert!(settings.validate().is_err());
    }
}
