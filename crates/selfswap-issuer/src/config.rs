use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use selfswap_core::{Error, Result, Version};

use crate::IssuerLayout;

pub const DEFAULT_MAX_UPDATE_ATTEMPTS: u32 = 3;
pub const DEFAULT_UNLOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Staging directories touched more recently than this are never swept.
pub const DEFAULT_STAGING_GRACE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Version compiled into the running issuer.
    pub version: Version,
    pub max_update_attempts: u32,
    pub unlock_timeout: Duration,
    pub poll_interval: Duration,
    pub staging_grace: Duration,
    pub service_name: Option<String>,
}

impl CoordinatorConfig {
    pub fn new(version: impl Into<Version>) -> Self {
        Self {
            version: version.into(),
            max_update_attempts: DEFAULT_MAX_UPDATE_ATTEMPTS,
            unlock_timeout: DEFAULT_UNLOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            staging_grace: DEFAULT_STAGING_GRACE,
            service_name: None,
        }
    }

    /// Zero falls back to the default rather than disabling updates.
    pub fn with_max_update_attempts(mut self, attempts: u32) -> Self {
        self.max_update_attempts = if attempts == 0 {
            DEFAULT_MAX_UPDATE_ATTEMPTS
        } else {
            attempts
        };
        self
    }

    pub fn with_staging_grace(mut self, grace: Duration) -> Self {
        self.staging_grace = grace;
        self
    }

    pub fn apply_settings(mut self, settings: &UpdaterSettings) -> Self {
        if let Some(attempts) = settings.max_update_attempts {
            self = self.with_max_update_attempts(attempts);
        }
        if let Some(ms) = settings.unlock_timeout_ms {
            self.unlock_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = settings.poll_interval_ms {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = settings.staging_grace_ms {
            self.staging_grace = Duration::from_millis(ms);
        }
        if let Some(name) = &settings.service_name {
            self.service_name = Some(name.clone());
        }
        self
    }

    /// Defaults plus the settings file beside the issuer, if any. A broken
    /// settings file is logged and ignored so it can never block startup.
    pub fn load(layout: &IssuerLayout, version: impl Into<Version>) -> Self {
        let config = Self::new(version);
        let path = layout.settings_path();
        match UpdaterSettings::load(&path) {
            Ok(Some(settings)) => config.apply_settings(&settings),
            Ok(None) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring updater settings");
                config
            }
        }
    }
}

/// Optional overrides read from `<issuer>.selfswap.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdaterSettings {
    pub max_update_attempts: Option<u32>,
    pub unlock_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub staging_grace_ms: Option<u64>,
    pub service_name: Option<String>,
}

impl UpdaterSettings {
    pub fn from_toml_str(input: &str) -> std::result::Result<Self, String> {
        let settings: Self = toml::from_str(input).map_err(|err| err.to_string())?;
        if settings.poll_interval_ms == Some(0) {
            return Err("poll_interval_ms must be greater than zero".to_string());
        }
        if settings
            .service_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err("service_name must not be empty".to_string());
        }
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::io(format!("failed to read {}", path.display()), err));
            }
        };
        Self::from_toml_str(&raw)
            .map(Some)
            .map_err(|reason| Error::CorruptState {
                path: path.to_path_buf(),
                reason,
            })
    }
}
