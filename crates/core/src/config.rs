use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::poller::PollTiming;
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub upload: UploadSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub poll_interval_ms: u64,
    pub not_ready_backoff_ms: u64,
    pub transport_backoff_ms: u64,
    pub completed_ttl_ms: u64,
    pub track_progress: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            not_ready_backoff_ms: 1000,
            transport_backoff_ms: 2000,
            completed_ttl_ms: 5000,
            track_progress: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            upload: UploadSettings::default(),
        }
    }
}

impl UploadSettings {
    pub fn poll_timing(&self) -> PollTiming {
        PollTiming {
            interval: Duration::from_millis(self.poll_interval_ms),
            not_ready_backoff: Duration::from_millis(self.not_ready_backoff_ms),
            transport_backoff: Duration::from_millis(self.transport_backoff_ms),
        }
    }

    pub fn completed_ttl(&self) -> Duration {
        Duration::from_millis(self.completed_ttl_ms)
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| Error::InvalidConfig {
            message: format!("base_url invalid: {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig {
                message: format!("base_url must be http(s) (got {})", url.scheme()),
            });
        }

        let intervals = [
            ("upload.poll_interval_ms", self.upload.poll_interval_ms),
            ("upload.not_ready_backoff_ms", self.upload.not_ready_backoff_ms),
            ("upload.transport_backoff_ms", self.upload.transport_backoff_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::InvalidConfig {
                    message: format!("{name} must be > 0"),
                });
            }
        }
        Ok(())
    }

    /// A non-empty `token` replaces the configured one.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(t) = token.filter(|t| !t.trim().is_empty()) {
            self.token = Some(t);
        }
        self
    }
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(v) = std::env::var("CLOUDDRIVE_CONFIG_DIR") {
        return PathBuf::from(v);
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".config").join("clouddrive"),
        Err(_) => PathBuf::from("."),
    }
}

pub fn load_config(config_dir: &Path) -> Result<ClientConfig> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(ClientConfig::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
        message: format!("config read failed: {e}"),
    })?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<ClientConfig> {
    let config: ClientConfig = toml::from_str(text).map_err(|e| Error::InvalidConfig {
        message: format!("config invalid: {e}"),
    })?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(config_dir: &Path, config: &ClientConfig) -> Result<()> {
    config.validate()?;

    let path = config_path(config_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::InvalidConfig {
            message: format!("config dir create failed: {e}"),
        })?;
    }

    let text = toml::to_string(config).map_err(|e| Error::InvalidConfig {
        message: format!("config encode failed: {e}"),
    })?;
    std::fs::write(&path, text).map_err(|e| Error::InvalidConfig {
        message: format!("config write failed: {e}"),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path()).unwrap();
        assert_eq!(cfg, ClientConfig::default());
        assert_eq!(cfg.upload.poll_timing(), PollTiming::default());
        assert_eq!(cfg.upload.completed_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn partial_upload_table_keeps_other_defaults() {
        let cfg = parse_config(
            r#"
base_url = "https://drive.example.com/api"

[upload]
transport_backoff_ms = 500
"#,
        )
        .unwrap();
        assert_eq!(cfg.base_url, "https://drive.example.com/api");
        assert_eq!(cfg.upload.transport_backoff_ms, 500);
        assert_eq!(cfg.upload.poll_interval_ms, 1000);
        assert!(cfg.upload.track_progress);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse_config(r#"base_url = "ftp://x""#),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(parse_config("base_url = \"not a url\"").is_err());
        assert!(parse_config("[upload]\npoll_interval_ms = 0").is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ClientConfig {
            token: Some("tok".to_string()),
            ..ClientConfig::default()
        };
        save_config(&dir.path().join("nested"), &cfg).unwrap();
        assert_eq!(load_config(&dir.path().join("nested")).unwrap(), cfg);
    }

    #[test]
    fn token_override_ignores_blank() {
        let cfg = ClientConfig {
            token: Some("file".to_string()),
            ..ClientConfig::default()
        };
        let kept = cfg.clone().with_token_override(Some(" ".to_string()));
        assert_eq!(kept.token.as_deref(), Some("file"));
        let replaced = cfg.with_token_override(Some("env".to_string()));
        assert_eq!(replaced.token.as_deref(), Some("env"));
    }
}
