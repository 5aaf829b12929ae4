//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lectern_core::auth::{Connectivity, SessionState};
use lectern_core::config::{BackendSettings, SyncSettings};
use lectern_core::OwnerId;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub backend: Option<BackendSettings>,
    #[serde(default)]
    pub sync: SyncSettings,
    /// Device owner for records written before sign-in
    #[serde(default)]
    pub anonymous_owner_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join("lectern").join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Failed to resolve CLI config directory".to_string())
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    lectern_core::util::normalize_text_option(value)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        if let Some(profile) = normalize_profile_name(explicit) {
            return profile;
        }
        if let Some(profile) =
            normalize_profile_name(std::env::var("LECTERN_PROFILE").ok().as_deref())
        {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(self.active_profile.as_deref()) {
            return profile;
        }
        "default".to_string()
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    pub fn user(&self) -> Option<OwnerId> {
        normalize_text_option(self.user_id.clone()).map(OwnerId::new)
    }

    pub fn anonymous_owner(&self) -> Option<OwnerId> {
        normalize_text_option(self.anonymous_owner_id.clone()).map(OwnerId::new)
    }

    /// Anonymous owner of this device, issued on first use.
    ///
    /// Returns the owner and whether it was newly generated.
    pub fn ensure_anonymous_owner(&mut self) -> (OwnerId, bool) {
        if let Some(owner) = self.anonymous_owner() {
            return (owner, false);
        }
        let owner = OwnerId::anonymous();
        self.anonymous_owner_id = Some(owner.to_string());
        (owner, true)
    }

    /// Session for the engines. A configured backend is assumed reachable;
    /// the sync pass health-checks it.
    pub fn session(&self) -> SessionState {
        let anonymous = self.anonymous_owner();
        match self.user() {
            Some(user) => {
                let connectivity = if self.backend.is_some() {
                    Connectivity::Online
                } else {
                    Connectivity::Offline
                };
                SessionState::authenticated(anonymous, user, connectivity)
            }
            None => SessionState::anonymous(anonymous.unwrap_or_else(OwnerId::anonymous)),
        }
    }

    fn normalize(&mut self) {
        self.anonymous_owner_id = normalize_text_option(self.anonymous_owner_id.clone());
        self.user_id = normalize_text_option(self.user_id.clone());
        if let Some(backend) = self.backend.as_mut() {
            backend.id = normalize_text_option(backend.id.clone());
            backend.base_url = backend.normalized_base_url();
            backend.token = normalize_text_option(backend.token.clone());
        }
    }
}
