use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::TimeDelta;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use spark_chat::{GROUP_GAP, ReconcilerConfig, SCROLL_FOLLOW_THRESHOLD, SessionConfig};

pub const SETTINGS_DIRECTORY_NAME: &str = "spark";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "SPARK_";
pub const DEFAULT_GRAPHQL_URL: &str = "http://localhost:4000/graphql";
pub const DEFAULT_GRAPHQL_WS_URL: &str = "ws://localhost:4000/graphql";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Client-wide settings. Layered as defaults, then the JSON file, then `SPARK_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
    #[serde(default = "default_graphql_ws_url")]
    pub graphql_ws_url: String,
    #[serde(default = "default_group_gap_seconds")]
    pub group_gap_seconds: u64,
    #[serde(default = "default_scroll_follow_threshold")]
    pub scroll_follow_threshold: f32,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            graphql_url: default_graphql_url(),
            graphql_ws_url: default_graphql_ws_url(),
            group_gap_seconds: default_group_gap_seconds(),
            scroll_follow_threshold: default_scroll_follow_threshold(),
            log_filter: default_log_filter(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.graphql_url = non_blank_or(self.graphql_url, default_graphql_url);
        self.graphql_ws_url = non_blank_or(self.graphql_ws_url, default_graphql_ws_url);
        self.log_filter = non_blank_or(self.log_filter, default_log_filter);
        if self.group_gap_seconds == 0 {
            self.group_gap_seconds = default_group_gap_seconds();
        }
        if !self.scroll_follow_threshold.is_finite() || self.scroll_follow_threshold <= 0.0 {
            self.scroll_follow_threshold = default_scroll_follow_threshold();
        }
        self
    }

    pub fn group_gap(&self) -> TimeDelta {
        i64::try_from(self.group_gap_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(GROUP_GAP)
    }

    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            reconciler: ReconcilerConfig::default().with_group_gap(self.group_gap()),
            scroll_follow_threshold: self.scroll_follow_threshold,
        }
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".spark"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layers(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ClientSettings) -> SettingsResult<()> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_layers(path: &Path) -> ClientSettings {
        let mut figment = Figment::from(Serialized::defaults(ClientSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::debug!("settings file not found at {:?}, using defaults", path);
        }
        figment = figment.merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to load settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ClientSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ClientSettings) -> SettingsResult<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeSettingsSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_graphql_url() -> String {
    DEFAULT_GRAPHQL_URL.to_string()
}

fn default_graphql_ws_url() -> String {
    DEFAULT_GRAPHQL_WS_URL.to_string()
}

fn default_group_gap_seconds() -> u64 {
    GROUP_GAP.num_seconds().unsigned_abs()
}

fn default_scroll_follow_threshold() -> f32 {
    SCROLL_FOLLOW_THRESHOLD
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
