//! Per-user voice/nickname/auto-follow preferences with a write-through
//! cache, mirroring the unified `discord_users` table the legacy
//! `user_voices` table was migrated into.

use std::{collections::HashMap, path::PathBuf, sync::Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{catalog, persist};

/// A single user's saved preferences.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    /// Platform display name, refreshed whenever a preference is set.
    pub display_name: String,

    /// User-chosen nickname used for chat auto-read attribution.
    pub nickname: Option<String>,

    /// User-chosen voice ID, or [`None`] to use the tenant's fallback.
    pub voice_id: Option<String>,

    /// Whether the bot should follow this user between voice channels.
    #[serde(default)]
    pub auto_join: bool,

    /// Last time any field on this record changed.
    pub updated_at: DateTime<Utc>,
}

/// Write-through, in-process cache of [`UserPreference`] records, keyed
/// by `(guild_id, user_id)`.
#[derive(Debug)]
pub struct UserPrefStore {
    path: PathBuf,
    records: Mutex<HashMap<(u64, u64), UserPreference>>,
}

impl UserPrefStore {
    /// Loads the store from `path`, creating an empty table if the file
    /// does not yet exist.
    ///
    /// # Errors
    ///
    /// If the file exists but could not be read or parsed.
    pub async fn load(path: PathBuf) -> anyhow::Result<Self> {
        let flat: Vec<FlatRecord> =
            persist::read_json_or_default(&path).await?;
        let records = flat
            .into_iter()
            .map(|r| ((r.guild_id, r.user_id), r.pref))
            .collect();
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Returns the saved preference for `(guild_id, user_id)`, if any.
    #[must_use]
    pub fn get(&self, guild_id: u64, user_id: u64) -> Option<UserPreference> {
        let records = self.records.lock().expect("user prefs lock poisoned");
        records.get(&(guild_id, user_id)).cloned()
    }

    /// Sets the user's voice preference, upserting `display_name`.
    ///
    /// # Errors
    ///
    /// If persisting the updated table fails.
    pub async fn set_voice(
        &self,
        guild_id: u64,
        user_id: u64,
        display_name: &str,
        voice_id: Option<String>,
    ) -> anyhow::Result<()> {
        self.upsert(guild_id, user_id, display_name, |pref| {
            pref.voice_id = voice_id;
        })
        .await
    }

    /// Sets the user's nickname, upserting `display_name`.
    ///
    /// # Errors
    ///
    /// If persisting the updated table fails.
    pub async fn set_nickname(
        &self,
        guild_id: u64,
        user_id: u64,
        display_name: &str,
        nickname: Option<String>,
    ) -> anyhow::Result<()> {
        self.upsert(guild_id, user_id, display_name, |pref| {
            pref.nickname = nickname;
        })
        .await
    }

    /// Sets the user's auto-follow flag, upserting `display_name`.
    ///
    /// # Errors
    ///
    /// If persisting the updated table fails.
    pub async fn set_auto_join(
        &self,
        guild_id: u64,
        user_id: u64,
        display_name: &str,
        auto_join: bool,
    ) -> anyhow::Result<()> {
        self.upsert(guild_id, user_id, display_name, |pref| {
            pref.auto_join = auto_join;
        })
        .await
    }

    /// Clears the user's voice preference, falling back to the tenant's
    /// fallback voice.
    ///
    /// # Errors
    ///
    /// If persisting the updated table fails.
    pub async fn clear_voice(
        &self,
        guild_id: u64,
        user_id: u64,
        display_name: &str,
    ) -> anyhow::Result<()> {
        self.upsert(guild_id, user_id, display_name, |pref| {
            pref.voice_id = None;
        })
        .await
    }

    /// Clears the user's nickname, falling back to their platform display
    /// name for chat auto-read attribution.
    ///
    /// # Errors
    ///
    /// If persisting the updated table fails.
    pub async fn clear_nickname(
        &self,
        guild_id: u64,
        user_id: u64,
        display_name: &str,
    ) -> anyhow::Result<()> {
        self.upsert(guild_id, user_id, display_name, |pref| {
            pref.nickname = None;
        })
        .await
    }

    /// Clears the user's auto-follow flag.
    ///
    /// # Errors
    ///
    /// If persisting the updated table fails.
    pub async fn clear_auto_join(
        &self,
        guild_id: u64,
        user_id: u64,
        display_name: &str,
    ) -> anyhow::Result<()> {
        self.upsert(guild_id, user_id, display_name, |pref| {
            pref.auto_join = false;
        })
        .await
    }

    async fn upsert(
        &self,
        guild_id: u64,
        user_id: u64,
        display_name: &str,
        mutate: impl FnOnce(&mut UserPreference),
    ) -> anyhow::Result<()> {
        let snapshot = {
            let mut records =
                self.records.lock().expect("user prefs lock poisoned");
            let pref = records.entry((guild_id, user_id)).or_default();
            pref.display_name = display_name.to_owned();
            mutate(pref);
            pref.updated_at = Utc::now();
            records.clone()
        };
        self.persist(snapshot).await
    }

    /// Rewrites every user in `guild_id` whose `voice_id` is `old_default`
    /// to `new_default`, as invoked when a tenant's reserved default
    /// voice changes.
    ///
    /// # Errors
    ///
    /// If persisting the updated table fails.
    pub async fn migrate_default_voice(
        &self,
        guild_id: u64,
        old_default: &str,
        new_default: &str,
    ) -> anyhow::Result<usize> {
        let (snapshot, migrated) = {
            let mut records =
                self.records.lock().expect("user prefs lock poisoned");
            let mut migrated = 0;
            for ((g, _), pref) in records.iter_mut() {
                if *g == guild_id && pref.voice_id.as_deref() == Some(old_default) {
                    pref.voice_id = Some(new_default.to_owned());
                    pref.updated_at = Utc::now();
                    migrated += 1;
                }
            }
            (records.clone(), migrated)
        };
        if migrated > 0 {
            self.persist(snapshot).await?;
        }
        Ok(migrated)
    }

    async fn persist(
        &self,
        records: HashMap<(u64, u64), UserPreference>,
    ) -> anyhow::Result<()> {
        let flat: Vec<FlatRecord> = records
            .into_iter()
            .map(|((guild_id, user_id), pref)| FlatRecord {
                guild_id,
                user_id,
                pref,
            })
            .collect();
        persist::write_json_atomic(&self.path, flat).await
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct FlatRecord {
    guild_id: u64,
    user_id: u64,
    #[serde(flatten)]
    pref: UserPreference,
}

/// Computes the voice a user falls back to once their saved voice was the
/// tenant's old reserved default and that default changed, per
/// [`UserPrefStore::migrate_default_voice`]'s contract: the tenant's
/// fallback voice if distinct from the new default, else the first
/// catalog voice distinct from the new default.
#[must_use]
pub fn user_default_voice(fallback_voice: &str, new_default: &str) -> String {
    if fallback_voice != new_default {
        fallback_voice.to_owned()
    } else {
        catalog::first_other_than(new_default).to_owned()
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    #[tokio::test]
    async fn set_and_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            UserPrefStore::load(dir.path().join("users.json")).await.unwrap();
        store
            .set_voice(1, 42, "Ada", Some("en_us_001".to_owned()))
            .await
            .unwrap();
        let pref = store.get(1, 42).unwrap();
        assert_eq!(pref.voice_id.as_deref(), Some("en_us_001"));
        assert_eq!(pref.display_name, "Ada");
    }

    #[tokio::test]
    async fn migration_only_touches_matching_records() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            UserPrefStore::load(dir.path().join("users.json")).await.unwrap();
        store.set_voice(1, 1, "A", Some("A".to_owned())).await.unwrap();
        store.set_voice(1, 2, "B", Some("B".to_owned())).await.unwrap();
        store.set_voice(1, 3, "C", Some("C".to_owned())).await.unwrap();

        let migrated = store.migrate_default_voice(1, "C", "D").await.unwrap();
        assert_eq!(migrated, 1);
        assert_eq!(store.get(1, 1).unwrap().voice_id.as_deref(), Some("A"));
        assert_eq!(store.get(1, 2).unwrap().voice_id.as_deref(), Some("B"));
        assert_eq!(store.get(1, 3).unwrap().voice_id.as_deref(), Some("D"));
    }

    #[tokio::test]
    async fn clear_voice_resets_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            UserPrefStore::load(dir.path().join("users.json")).await.unwrap();
        store
            .set_voice(1, 42, "Ada", Some("en_us_001".to_owned()))
            .await
            .unwrap();
        store.clear_voice(1, 42, "Ada").await.unwrap();
        assert_eq!(store.get(1, 42).unwrap().voice_id, None);
    }

    #[tokio::test]
    async fn clear_nickname_and_auto_join_reset_their_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            UserPrefStore::load(dir.path().join("users.json")).await.unwrap();
        store
            .set_nickname(1, 42, "Ada", Some("The Machinist".to_owned()))
            .await
            .unwrap();
        store.set_auto_join(1, 42, "Ada", true).await.unwrap();

        store.clear_nickname(1, 42, "Ada").await.unwrap();
        store.clear_auto_join(1, 42, "Ada").await.unwrap();

        let pref = store.get(1, 42).unwrap();
        assert_eq!(pref.nickname, None);
        assert!(!pref.auto_join);
    }

    #[test]
    fn user_default_prefers_fallback_voice() {
        assert_eq!(user_default_voice("g-en", "en_us_001"), "g-en");
    }

    #[test]
    fn user_default_skips_new_default_when_it_equals_fallback() {
        let other = user_default_voice("en_us_001", "en_us_001");
        assert_ne!(other, "en_us_001");
    }
}
