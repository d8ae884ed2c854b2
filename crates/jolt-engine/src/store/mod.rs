//! Observable settings store.
//!
//! The store owns the only mutable copy of the settings. Readers get an
//! immutable [`Settings`] snapshot; writers go through [`SettingsStore::set`],
//! [`SettingsStore::remove`] or [`SettingsStore::save`], which persist first and
//! then publish one [`SettingsChange`] per key that actually changed.

mod backend;

pub use backend::{FileBackend, KeyValueBackend, MemoryBackend};

use jolt_common::error::SettingsError;
use jolt_common::settings::{SettingKey, SettingValue, Settings};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage format error: {0}")]
    Format(#[from] serde_yaml::Error),
    #[error("Storage unavailable")]
    Unavailable,
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Published after a key's value changed.
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub key: SettingKey,
    /// Settings as of this change.
    pub snapshot: Arc<Settings>,
}

pub struct SettingsStore {
    backend: Arc<dyn KeyValueBackend>,
    current: RwLock<Arc<Settings>>,
    write_lock: tokio::sync::Mutex<()>,
    changes: broadcast::Sender<SettingsChange>,
}

impl SettingsStore {
    /// Load every key from `backend`. An empty backend is a fresh install and
    /// gets the defaults written to it; an unreadable one leaves the store on
    /// defaults.
    pub async fn open(backend: Arc<dyn KeyValueBackend>) -> Self {
        let settings = match backend.load().await {
            Ok(entries) if entries.is_empty() => {
                let defaults = Settings::default();
                if let Err(e) = backend.apply(&to_changes(&defaults)).await {
                    warn!(error = %e, "Failed to seed default settings");
                } else {
                    info!("Seeded default settings");
                }
                defaults
            }
            Ok(entries) => settings_from(entries),
            Err(e) => {
                error!(error = %e, "Failed to load settings; using defaults");
                Settings::default()
            }
        };

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            backend,
            current: RwLock::new(Arc::new(settings)),
            write_lock: tokio::sync::Mutex::new(()),
            changes,
        }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Current value, or the key's default when it was never set. `None` only
    /// for a disabled shock interval.
    pub fn get(&self, key: SettingKey) -> Option<SettingValue> {
        self.snapshot().get(key)
    }

    pub async fn set(&self, key: SettingKey, value: SettingValue) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();
        next.apply(key, Some(value))?;

        let persisted = match next.get(key) {
            Some(stored) => self.backend.set(key.as_str(), &stored).await,
            None => self.backend.remove(key.as_str()).await,
        };
        persisted.inspect_err(|e| error!(key = %key, error = %e, "Failed to persist setting"))?;

        self.publish(next);
        Ok(())
    }

    /// Drop the persisted value; the key falls back to its default.
    pub async fn remove(&self, key: SettingKey) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();
        next.apply(key, None)?;

        self.backend
            .remove(key.as_str())
            .await
            .inspect_err(|e| error!(key = %key, error = %e, "Failed to remove setting"))?;

        self.publish(next);
        Ok(())
    }

    /// Settings-form save: clamp numeric fields, persist every key, remove the
    /// interval when it is unset.
    pub async fn save(&self, settings: &Settings) -> Result<Vec<SettingKey>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let next = settings.clamped();

        self.backend
            .apply(&to_changes(&next))
            .await
            .inspect_err(|e| error!(error = %e, "Failed to save settings"))?;

        Ok(self.publish(next))
    }

    /// Re-read the backend and publish whatever changed underneath us.
    pub async fn reload(&self) -> Result<Vec<SettingKey>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let entries = self.backend.load().await?;
        Ok(self.publish(settings_from(entries)))
    }

    pub fn subscribe(&self) -> SettingsSubscription {
        SettingsSubscription {
            rx: self.changes.subscribe(),
            keys: None,
        }
    }

    /// Swap in `next` and notify per changed key.
    fn publish(&self, next: Settings) -> Vec<SettingKey> {
        let changed = self.snapshot().changed_keys(&next);
        if changed.is_empty() {
            return changed;
        }

        let next = Arc::new(next);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&next),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&next),
        }

        for key in &changed {
            debug!(key = %key, "Setting changed");
            // No receivers is fine.
            let _ = self.changes.send(SettingsChange {
                key: *key,
                snapshot: Arc::clone(&next),
            });
        }
        changed
    }
}

/// Poll the backend so edits made by another process reach subscribers.
pub fn spawn_reload_poller(store: Arc<SettingsStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.reload().await {
                Ok(changed) if !changed.is_empty() => {
                    info!(count = changed.len(), "Settings changed on disk");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to reload settings"),
            }
        }
    })
}

/// Change feed. Dropping it unsubscribes.
pub struct SettingsSubscription {
    rx: broadcast::Receiver<SettingsChange>,
    keys: Option<Vec<SettingKey>>,
}

impl SettingsSubscription {
    /// Only deliver changes to `keys`.
    pub fn only(mut self, keys: &[SettingKey]) -> Self {
        self.keys = Some(keys.to_vec());
        self
    }

    /// Next change, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<SettingsChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if self.wants(change.key) {
                        return Some(change);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Settings subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn wants(&self, key: SettingKey) -> bool {
        self.keys.as_ref().is_none_or(|keys| keys.contains(&key))
    }
}

fn settings_from(entries: BTreeMap<String, SettingValue>) -> Settings {
    let known = entries.into_iter().filter_map(|(name, value)| {
        match SettingKey::ALL.iter().find(|k| k.as_str() == name) {
            Some(key) => Some((*key, value)),
            None => {
                debug!(key = %name, "Ignoring unknown stored key");
                None
            }
        }
    });
    let (settings, errors) = Settings::from_entries(known);
    for e in errors {
        warn!(error = %e, "Ignoring invalid stored setting");
    }
    settings
}

fn to_changes(settings: &Settings) -> Vec<(String, Option<SettingValue>)> {
    settings
        .entries()
        .into_iter()
        .map(|(key, value)| (key.as_str().to_string(), value))
        .collect()
}
