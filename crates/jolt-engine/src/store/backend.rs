use super::StoreError;
use async_trait::async_trait;
use jolt_common::settings::SettingValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Flat key-value persistence. Keys are the camelCase setting names.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Every stored key. Missing storage reads as empty.
    async fn load(&self) -> Result<BTreeMap<String, SettingValue>, StoreError>;

    async fn set(&self, key: &str, value: &SettingValue) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Write a batch; `None` removes the key.
    async fn apply(&self, changes: &[(String, Option<SettingValue>)]) -> Result<(), StoreError> {
        for (key, value) in changes {
            match value {
                Some(value) => self.set(key, value).await?,
                None => self.remove(key).await?,
            }
        }
        Ok(())
    }
}

/// YAML map on disk, rewritten atomically on every change.
pub struct FileBackend {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// `~/.jolt/settings.yaml`, or `./settings.yaml` without a home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".jolt").join("settings.yaml"))
            .unwrap_or_else(|| PathBuf::from("./settings.yaml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_raw(&self) -> Result<BTreeMap<String, serde_yaml::Value>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    async fn write_raw(&self, map: &BTreeMap<String, serde_yaml::Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_yaml::to_string(map)?;
        let tmp_path = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn load(&self) -> Result<BTreeMap<String, SettingValue>, StoreError> {
        let raw = self.read_raw().await?;
        let mut values = BTreeMap::new();
        for (key, value) in raw {
            match serde_yaml::from_value::<SettingValue>(value) {
                Ok(v) => {
                    values.insert(key, v);
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable setting"),
            }
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &SettingValue) -> Result<(), StoreError> {
        self.apply(&[(key.to_string(), Some(value.clone()))]).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.apply(&[(key.to_string(), None)]).await
    }

    async fn apply(&self, changes: &[(String, Option<SettingValue>)]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut raw = self.read_raw().await?;
        for (key, value) in changes {
            match value {
                Some(value) => {
                    raw.insert(key.clone(), serde_yaml::to_value(value)?);
                }
                None => {
                    raw.remove(key);
                }
            }
        }
        self.write_raw(&raw).await
    }
}

/// In-process storage for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<BTreeMap<String, SettingValue>>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (String, SettingValue)>,
    {
        Self {
            values: Mutex::new(values.into_iter().collect()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail, as if the storage area went away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, SettingValue>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn load(&self) -> Result<BTreeMap<String, SettingValue>, StoreError> {
        self.check()?;
        Ok(self.values().clone())
    }

    async fn set(&self, key: &str, value: &SettingValue) -> Result<(), StoreError> {
        self.check()?;
        self.values().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.values().remove(key);
        Ok(())
    }
}
