use crate::{PilotError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PilotConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub create: CreateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Zero or absent leaves requests unbounded.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Where the session record lives. Defaults to the user data dir.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_console_scheme")]
    pub scheme: String,
    /// Host that serves the noVNC page. Defaults to the API host.
    pub host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_confirm_destructive_actions")]
    pub confirm_destructive_actions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConfig {
    #[serde(default = "default_iso_images")]
    pub iso_images: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            request_timeout_seconds: None,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            scheme: default_console_scheme(),
            host: None,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            confirm_destructive_actions: default_confirm_destructive_actions(),
        }
    }
}

impl Default for CreateConfig {
    fn default() -> Self {
        Self {
            iso_images: default_iso_images(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_console_scheme() -> String {
    "https".to_string()
}

fn default_confirm_destructive_actions() -> bool {
    true
}

fn default_iso_images() -> Vec<String> {
    vec!["ubuntu-22.04-live-server-amd64.iso".to_string()]
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Host part of `base_url`, if it parses.
    pub fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }
}

impl PilotConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("virtpilot")
            .join("config.toml")
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PilotConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let config: PilotConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| PilotError::ConfigError(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn session_file(&self) -> PathBuf {
        self.session
            .file
            .clone()
            .unwrap_or_else(crate::session::FileSessionStorage::default_path)
    }

    /// Host the console URL points at: explicit setting, else the API host.
    pub fn console_host(&self) -> Option<String> {
        self.console.host.clone().or_else(|| self.api.host())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = PilotConfig::from_str("").unwrap();
        assert_eq!(config.api.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.api.request_timeout(), None);
        assert_eq!(config.console.scheme, "https");
        assert!(config.ui.confirm_destructive_actions);
        assert_eq!(config.console_host().as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_config_parsing() {
        let toml_str = r#"
[api]
base_url = "http://100.82.183.59:8080"
request_timeout_seconds = 30

[session]
file = "/tmp/virtpilot/session.json"

[console]
scheme = "http"
host = "console.lab"

[ui]
confirm_destructive_actions = false

[create]
iso_images = ["debian-13.iso", "alpine.iso"]
"#;

        let config = PilotConfig::from_str(toml_str).unwrap();
        assert_eq!(config.api.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.session_file(), PathBuf::from("/tmp/virtpilot/session.json"));
        assert_eq!(config.console_host().as_deref(), Some("console.lab"));
        assert_eq!(config.console.scheme, "http");
        assert!(!config.ui.confirm_destructive_actions);
        assert_eq!(config.create.iso_images.len(), 2);
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let config = PilotConfig::from_str("[api]\nrequest_timeout_seconds = 0\n").unwrap();
        assert_eq!(config.api.request_timeout(), None);
    }

    #[test]
    fn console_host_falls_back_to_api_host() {
        let config = PilotConfig::from_str("[api]\nbase_url = \"http://10.0.0.5:8080/\"\n").unwrap();
        assert_eq!(config.console_host().as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = PilotConfig::default();
        config.api.base_url = "http://hv:9000".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = PilotConfig::from_file(&path).unwrap();
        assert_eq!(loaded.api.base_url, "http://hv:9000");
    }
}
