use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::KestrelError;
use crate::core::hash::sha256_hex;

/// One stored API credential. The secret is kept in cleartext in the config
/// file, mirroring what the vendor console hands out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_id: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i64,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            active_id: None,
            poll_interval: default_poll_interval(),
            lookback_minutes: default_lookback_minutes(),
            profiles: Vec::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    15
}

fn default_lookback_minutes() -> i64 {
    10
}

pub fn config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kestrel")
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Load the config, falling back to defaults on a missing or malformed
    /// file. A broken config must never prevent startup.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&content) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(
                    "could not parse {}: {err}; starting with defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), KestrelError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| KestrelError::Config(e.to_string()))?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| KestrelError::Config(e.to_string()))?;
        fs::write(path, content).map_err(|e| KestrelError::Config(e.to_string()))
    }

    pub fn active(&self) -> Option<&Profile> {
        let id = self.active_id.as_deref()?;
        self.profiles.iter().find(|p| p.id == id)
    }
}

/// Stable short profile id derived from the credential itself.
pub fn generate_profile_id(
    client_id: &str,
    base_url: &str,
    created_at: &DateTime<Utc>,
) -> String {
    let digest = sha256_hex(
        format!("{client_id}|{base_url}|{}", created_at.to_rfc3339()).as_bytes(),
    );
    digest[..10].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::now_utc;
    use tempfile::TempDir;

    #[test]
    fn config_round_trips_through_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let created = now_utc();
        let mut cfg = AppConfig::default();
        cfg.profiles.push(Profile {
            id: generate_profile_id("client-a", "https://api.example.com", &created),
            client_id: "client-a".into(),
            client_secret: "s3cret".into(),
            base_url: "https://api.example.com".into(),
            created_at: created,
        });
        cfg.active_id = Some(cfg.profiles[0].id.clone());
        cfg.poll_interval = 30;

        cfg.save(&path).unwrap();
        let loaded = AppConfig::load(&path);
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.active(), Some(&cfg.profiles[0]));
    }

    #[test]
    fn malformed_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_interval = \"not a number\"").unwrap();

        let loaded = AppConfig::load(&path);
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn missing_config_is_default() {
        let dir = TempDir::new().unwrap();
        let loaded = AppConfig::load(&dir.path().join("missing.toml"));
        assert_eq!(loaded, AppConfig::default());
        assert!(loaded.active().is_none());
    }

    #[test]
    fn profile_ids_are_stable_and_short() {
        let created = now_utc();
        let a = generate_profile_id("client-a", "https://api.example.com", &created);
        let b = generate_profile_id("client-a", "https://api.example.com", &created);
        let c = generate_profile_id("client-b", "https://api.example.com", &created);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 10);
    }
}
