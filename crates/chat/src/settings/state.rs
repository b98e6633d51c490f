use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use vetchat_agent::{DEFAULT_BASE_ADDRESS, GatewayConfig};

use crate::session::FirebaseConfig;
use crate::session::firebase::{DEFAULT_IDENTITY_ENDPOINT, DEFAULT_TOKEN_ENDPOINT};

pub const SETTINGS_DIRECTORY_NAME: &str = "vetchat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "VETCHAT_";
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 50 * 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_identity_endpoint")]
    pub identity_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            identity_endpoint: default_identity_endpoint(),
            token_endpoint: default_token_endpoint(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl IdentitySettings {
    /// `None` until an API key is configured; sign-in is unavailable without one.
    pub fn to_firebase_config(&self) -> Option<FirebaseConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        let mut config = FirebaseConfig::new(self.api_key.trim());
        config.identity_endpoint = self.identity_endpoint.clone();
        config.token_endpoint = self.token_endpoint.clone();
        Some(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    fn normalized(mut self) -> Self {
        self.api_key = self.api_key.trim().to_string();
        self.identity_endpoint = non_blank_or(self.identity_endpoint, DEFAULT_IDENTITY_ENDPOINT);
        self.token_endpoint = non_blank_or(self.token_endpoint, DEFAULT_TOKEN_ENDPOINT);
        if self.refresh_interval_secs == 0 {
            self.refresh_interval_secs = DEFAULT_REFRESH_INTERVAL_SECS;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_base_address")]
    pub base_address: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub identity: IdentitySettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            base_address: default_base_address(),
            request_timeout_secs: default_request_timeout_secs(),
            identity: IdentitySettings::default(),
        }
    }
}

impl AppSettings {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new(self.base_address.clone())
            .with_connect_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn normalized(mut self) -> Self {
        self.base_address = non_blank_or(self.base_address, DEFAULT_BASE_ADDRESS)
            .trim_end_matches('/')
            .to_string();
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
        self.identity = self.identity.normalized();
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".vetchat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layers(&config_path, Env::prefixed(ENV_PREFIX).split("__"));
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    /// Replaces the in-memory settings without touching the file, e.g. for CLI overrides.
    pub fn override_with(&self, apply: impl FnOnce(&mut AppSettings)) {
        let mut settings = AppSettings::clone(&self.settings.load());
        apply(&mut settings);
        self.settings.store(Arc::new(settings.normalized()));
    }

    /// Writes the effective settings, overrides included, to the settings file.
    pub fn save(&self) -> Result<(), SettingsError> {
        self.persist(&self.settings())
    }

    /// Defaults, then the JSON file if present, then `env`.
    fn load_layers(path: &Path, env: Env) -> AppSettings {
        let mut figment = Figment::from(Serialized::defaults(AppSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }
        figment = figment.merge(env);

        match figment.extract::<AppSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                AppSettings::default()
            }
        }
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
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

        tracing::info!(path = ?self.config_path, "saved settings");
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
    SerializeConfig {
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

fn non_blank_or(value: String, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn default_base_address() -> String {
    DEFAULT_BASE_ADDRESS.to_string()
}

fn default_identity_endpoint() -> String {
    DEFAULT_IDENTITY_ENDPOINT.to_string()
}

fn default_token_endpoint() -> String {
    DEFAULT_TOKEN_ENDPOINT.to_string()
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
