use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use snafu::ResultExt;
use url::Url;

use crate::error::{ApplicationError, ConfigLoadSnafu};
use crate::model::{Record, User};
use crate::service::Preferences;
use crate::session::Settings;
use crate::time::humantime_text;

/// Settings read from the environment (and `.env`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// `mem://`, `ws://host:port` or `http://host:port`, with `?ns=...&db=...`. Credentials go
    /// in the userinfo part.
    pub store_url: Url,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_comment_limit")]
    pub comment_limit: u32,
    /// Dedup window for views until the viewer saves their own.
    #[serde(default = "default_view_window", with = "humantime_text")]
    pub view_window: Duration,
    pub preferences_path: Option<PathBuf>,
    pub viewer_id: Option<String>,
    pub viewer_name: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config, ApplicationError> {
        envy::from_env::<Config>().context(ConfigLoadSnafu)
    }

    /// The viewer handed in by the sign-in layer, if any.
    pub fn viewer(&self) -> Option<User> {
        let id = self.viewer_id.as_deref().filter(|id| !id.is_empty())?;
        let name = self.viewer_name.clone().unwrap_or_else(|| id.to_string());
        Some(User::new(Record::new(id), name))
    }

    pub fn settings(&self) -> Settings {
        Settings::new(self.page_size, self.comment_limit)
    }

    pub fn default_preferences(&self) -> Preferences {
        Preferences {
            view_dedup_window: self.view_window,
            ..Preferences::default()
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_page_size() -> u32 {
    12
}

fn default_comment_limit() -> u32 {
    100
}

fn default_view_window() -> Duration {
    Duration::from_secs(5 * 60)
}
