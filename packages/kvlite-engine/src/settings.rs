//! Validated, change-observable configuration (C10, §4.9).

use std::time::Duration;

use regex::Regex;
use tokio::sync::watch;

use kvlite_core::{KvLiteError, KvLiteResult, MAX_PARENT_KEYS};

fn identifier_regex() -> Regex {
    Regex::new("^[A-Za-z0-9_]*$").expect("static regex is valid")
}

/// Validated configuration for a [`crate::engine::CacheEngine`].
///
/// Constructed via [`Settings::new`], which validates every field up
/// front; invalid settings fail fast rather than surfacing as a confusing
/// backend error on first use.
#[derive(Debug, Clone)]
pub struct Settings {
    pub default_partition: String,
    pub static_interval: Duration,
    pub chances_of_auto_cleanup: f64,
    pub min_length_for_compression: usize,
    pub max_partition_name_length: usize,
    pub max_key_name_length: usize,
    pub connection_string: String,
    pub cache_schema_name: String,
    pub cache_entries_table_name: String,
    pub max_cached_connections: usize,
    pub max_pooled_buffers: usize,
    pub retry_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_partition: "KVLite.*".to_string(),
            static_interval: Duration::from_secs(30 * 24 * 3600),
            chances_of_auto_cleanup: 0.01,
            min_length_for_compression: 4096,
            max_partition_name_length: 255,
            max_key_name_length: 255,
            connection_string: String::new(),
            cache_schema_name: String::new(),
            cache_entries_table_name: "kvl_cache_entries".to_string(),
            max_cached_connections: 10,
            max_pooled_buffers: 64,
            retry_attempts: 3,
        }
    }
}

impl Settings {
    /// Validates `self` against the constraints of spec.md §4.9. Returns
    /// `KvLiteError::InvalidArgument` describing the first violation found.
    pub fn validate(&self) -> KvLiteResult<()> {
        if self.default_partition.is_empty() {
            return Err(KvLiteError::InvalidArgument(
                "default_partition must not be empty".into(),
            ));
        }
        if self.static_interval.is_zero() {
            return Err(KvLiteError::InvalidArgument(
                "static_interval_days must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.chances_of_auto_cleanup) {
            return Err(KvLiteError::InvalidArgument(
                "chances_of_auto_cleanup must be in [0, 1]".into(),
            ));
        }
        if self.min_length_for_compression == 0 {
            return Err(KvLiteError::InvalidArgument(
                "min_length_for_compression must be > 0".into(),
            ));
        }
        if self.max_partition_name_length == 0 {
            return Err(KvLiteError::InvalidArgument(
                "max_partition_name_length must be > 0".into(),
            ));
        }
        if self.max_key_name_length == 0 {
            return Err(KvLiteError::InvalidArgument(
                "max_key_name_length must be > 0".into(),
            ));
        }
        if self.connection_string.trim().is_empty() {
            return Err(KvLiteError::InvalidArgument(
                "connection_string must not be blank".into(),
            ));
        }
        let re = identifier_regex();
        if !re.is_match(&self.cache_schema_name) {
            return Err(KvLiteError::InvalidArgument(format!(
                "cache_schema_name {:?} does not match {}",
                self.cache_schema_name,
                re.as_str()
            )));
        }
        if !re.is_match(&self.cache_entries_table_name) || self.cache_entries_table_name.is_empty()
        {
            return Err(KvLiteError::InvalidArgument(format!(
                "cache_entries_table_name {:?} does not match {}",
                self.cache_entries_table_name,
                re.as_str()
            )));
        }
        Ok(())
    }

    /// The hard ceiling on parent keys per item. A constant in spec.md's
    /// table, so it is not itself tunable -- it is the length of
    /// [`kvlite_core::ParentKeys`].
    #[must_use]
    pub fn max_parent_keys_per_item(&self) -> usize {
        MAX_PARENT_KEYS
    }
}

/// A [`Settings`] value plus a change-notification channel.
///
/// Mirrors the watch-channel idiom used elsewhere in the pack for
/// propagating configuration updates to long-lived subscribers (the
/// auto-cleanup task, metrics reporters) without polling.
pub struct SettingsHandle {
    tx: watch::Sender<Settings>,
}

impl SettingsHandle {
    /// Validates and wraps `settings`, returning the handle and a receiver
    /// subscribed to future changes.
    pub fn new(settings: Settings) -> KvLiteResult<(Self, watch::Receiver<Settings>)> {
        settings.validate()?;
        let (tx, rx) = watch::channel(settings);
        Ok((Self { tx }, rx))
    }

    /// Current settings snapshot.
    #[must_use]
    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    /// Validates and applies a new settings value, notifying subscribers.
    pub fn update(&self, settings: Settings) -> KvLiteResult<()> {
        settings.validate()?;
        // A `watch::Sender::send` only fails when every receiver has been
        // dropped; that is not an error for the settings owner.
        let _ = self.tx.send(settings);
        Ok(())
    }

    /// Subscribes to future changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> Settings {
        Settings {
            connection_string: "sqlite::memory:".to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn default_with_connection_string_validates() {
        assert!(valid_settings().validate().is_ok());
    }

    #[test]
    fn rejects_empty_default_partition() {
        let mut s = valid_settings();
        s.default_partition = String::new();
        assert!(matches!(s.validate(), Err(KvLiteError::InvalidArgument(_))));
    }

    #[test]
    fn rejects_out_of_range_auto_cleanup_chance() {
        let mut s = valid_settings();
        s.chances_of_auto_cleanup = 1.5;
        assert!(s.validate().is_err());
        s.chances_of_auto_cleanup = -0.1;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_blank_connection_string() {
        let mut s = valid_settings();
        s.connection_string = "   ".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_invalid_schema_name() {
        let mut s = valid_settings();
        s.cache_schema_name = "bad-name; DROP TABLE".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn accepts_empty_schema_name() {
        let mut s = valid_settings();
        s.cache_schema_name = String::new();
        assert!(s.validate().is_ok());
    }

    #[tokio::test]
    async fn settings_handle_notifies_subscribers() {
        let (handle, mut rx) = SettingsHandle::new(valid_settings()).unwrap();
        let mut updated = valid_settings();
        updated.chances_of_auto_cleanup = 0.5;
        handle.update(updated).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().chances_of_auto_cleanup, 0.5);
    }

    #[test]
    fn settings_handle_rejects_invalid_update() {
        let (handle, _rx) = SettingsHandle::new(valid_settings()).unwrap();
        let mut bad = valid_settings();
        bad.connection_string = String::new();
        assert!(handle.update(bad).is_err());
        // The valid settings are still in effect.
        assert_eq!(handle.current().connection_string, "sqlite::memory:");
    }
}
