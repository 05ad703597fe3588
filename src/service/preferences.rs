use std::collections::BTreeMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use snafu::{Location, ResultExt as _, Snafu};
use tracing::instrument;

use crate::time::humantime_text;
use crate::Located;

const PREFERENCES_KEY: &str = "preferences";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PreferenceError {
    #[snafu(display("could not read `{}`: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not write `{}`: {source}", path.display()))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// The file exists but is not a JSON object of strings
    #[snafu(display("`{}` is not a preferences file: {source}", path.display()))]
    ParseFile {
        path: PathBuf,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not encode preferences: {source}"))]
    Encode {
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for PreferenceError {
    fn location(&self) -> Location {
        match self {
            Self::ReadFile { location, .. }
            | Self::WriteFile { location, .. }
            | Self::ParseFile { location, .. }
            | Self::Encode { location, .. } => *location,
        }
    }
}

/// Per-viewer settings that outlive a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Whether videos start muted.
    pub muted: bool,
    /// How long after a logged view another view of the same video is not counted.
    #[serde(with = "humantime_text")]
    pub view_dedup_window: Duration,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            muted: true,
            view_dedup_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Where preferences are persisted.
pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str)
        -> impl Future<Output = Result<Option<String>, PreferenceError>> + Send;

    fn write(
        &self, key: &str, value: String,
    ) -> impl Future<Output = Result<(), PreferenceError>> + Send;
}

/// Keeps values for the lifetime of the process. Clones share their contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    values: Arc<DashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKv {
    async fn read(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.values.get(key).map(|value| value.clone()))
    }

    async fn write(&self, key: &str, value: String) -> Result<(), PreferenceError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Keeps values in a JSON object on disk.
#[derive(Debug, Clone, derive_new::new)]
pub struct FileKv {
    path: PathBuf,
}

impl FileKv {
    async fn entries(&self) -> Result<BTreeMap<String, String>, PreferenceError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(error) => return Err(error).context(ReadFileSnafu { path: &self.path }),
        };

        serde_json::from_str(&text).context(ParseFileSnafu { path: &self.path })
    }
}

impl KeyValueStore for FileKv {
    async fn read(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.entries().await?.remove(key))
    }

    #[instrument(skip(self, value), fields(path = %self.path.display()))]
    async fn write(&self, key: &str, value: String) -> Result<(), PreferenceError> {
        let mut entries = match self.entries().await {
            Ok(entries) => entries,
            Err(PreferenceError::ParseFile { source, .. }) => {
                tracing::warn!(error = %source, "replacing an unreadable preferences file");
                BTreeMap::new()
            }
            Err(error) => return Err(error),
        };
        entries.insert(key.to_string(), value);

        let text = serde_json::to_string_pretty(&entries).context(EncodeSnafu)?;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context(WriteFileSnafu { path: parent })?;
        }

        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, text)
            .await
            .context(WriteFileSnafu { path: &staging })?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .context(WriteFileSnafu { path: &self.path })
    }
}

/// Loads and saves [Preferences] through a [KeyValueStore].
#[derive(Debug, Clone)]
pub struct PreferenceStore<K> {
    kv: K,
    defaults: Preferences,
}

impl<K: KeyValueStore> PreferenceStore<K> {
    pub fn new(kv: K) -> Self {
        Self::with_defaults(kv, Preferences::default())
    }

    /// Uses `defaults` when nothing usable was saved yet.
    pub fn with_defaults(kv: K, defaults: Preferences) -> Self {
        Self { kv, defaults }
    }

    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Preferences, PreferenceError> {
        let Some(text) = self.kv.read(PREFERENCES_KEY).await? else {
            return Ok(self.defaults.clone());
        };

        match serde_json::from_str(&text) {
            Ok(preferences) => Ok(preferences),
            Err(error) => {
                tracing::warn!(error = %error, "saved preferences are corrupt, using defaults");
                Ok(self.defaults.clone())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn save(&self, preferences: &Preferences) -> Result<(), PreferenceError> {
        let text = serde_json::to_string(preferences).context(EncodeSnafu)?;
        self.kv.write(PREFERENCES_KEY, text).await
    }
}
