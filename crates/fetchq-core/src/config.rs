use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::ConnectionDefaults;
use crate::transport::CurlOptions;

/// libcurl transport parameters (optional `[curl]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurlConfig {
    /// Seconds allowed for the TCP/TLS connect phase.
    pub connect_timeout_secs: u64,
    /// Minimum bytes/s before a transfer counts as stalled.
    pub low_speed_limit: u32,
    /// Seconds below `low_speed_limit` before the transfer is aborted.
    pub low_speed_time_secs: u64,
    /// Redirects followed per exchange.
    pub max_redirections: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Receive buffer size in bytes (None = libcurl default).
    #[serde(default)]
    pub buffer_size: Option<usize>,
}

impl Default for CurlConfig {
    fn default() -> Self {
        let options = CurlOptions::default();
        Self {
            connect_timeout_secs: options.connect_timeout.as_secs(),
            low_speed_limit: options.low_speed_limit,
            low_speed_time_secs: options.low_speed_time.as_secs(),
            max_redirections: options.max_redirections,
            user_agent: None,
            buffer_size: None,
        }
    }
}

/// Global configuration loaded from `~/.config/fetchq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Default bound for new queues (None = unbounded).
    #[serde(default)]
    pub max_concurrent_connections: Option<usize>,
    /// Whether new connections buffer their body in memory.
    pub uses_buffer: bool,
    /// Whether new connections hold a background task while running.
    pub runs_in_background: bool,
    /// Optional transport settings; if missing, built-in defaults are used.
    #[serde(default)]
    pub curl: Option<CurlConfig>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let defaults = ConnectionDefaults::default();
        Self {
            max_concurrent_connections: defaults.max_concurrent_connections,
            uses_buffer: defaults.uses_buffer,
            runs_in_background: defaults.runs_in_background,
            curl: None,
        }
    }
}

impl FetchConfig {
    pub fn connection_defaults(&self) -> ConnectionDefaults {
        ConnectionDefaults {
            uses_buffer: self.uses_buffer,
            runs_in_background: self.runs_in_background,
            max_concurrent_connections: self.max_concurrent_connections,
        }
    }

    pub fn curl_options(&self) -> CurlOptions {
        let curl = self.curl.clone().unwrap_or_default();
        CurlOptions {
            connect_timeout: Duration::from_secs(curl.connect_timeout_secs),
            low_speed_limit: curl.low_speed_limit,
            low_speed_time: Duration::from_secs(curl.low_speed_time_secs),
            max_redirections: curl.max_redirections,
            buffer_size: curl.buffer_size,
            user_agent: curl.user_agent,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchConfig> {
    load_or_init_at(&config_path()?)
}

/// Like [`load_or_init`], for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<FetchConfig> {
    if !path.exists() {
        let default_cfg = FetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: FetchConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = FetchConfig::default();
        assert_eq!(cfg.max_concurrent_connections, None);
        assert!(cfg.uses_buffer);
        assert!(!cfg.runs_in_background);
        assert!(cfg.curl.is_none());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = FetchConfig {
            max_concurrent_connections: Some(3),
            ..FetchConfig::default()
        };
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: FetchConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_connections, Some(3));
        assert_eq!(parsed.uses_buffer, cfg.uses_buffer);
        assert_eq!(parsed.runs_in_background, cfg.runs_in_background);
    }

    #[test]
    fn config_toml_curl_section() {
        let toml = r#"
            max_concurrent_connections = 4
            uses_buffer = false
            runs_in_background = true

            [curl]
            connect_timeout_secs = 5
            low_speed_limit = 10
            low_speed_time_secs = 20
            max_redirections = 2
            user_agent = "fetchq-test"
        "#;
        let cfg: FetchConfig = toml::from_str(toml).unwrap();
        let defaults = cfg.connection_defaults();
        assert_eq!(defaults.max_concurrent_connections, Some(4));
        assert!(!defaults.uses_buffer);
        assert!(defaults.runs_in_background);

        let options = cfg.curl_options();
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.low_speed_limit, 10);
        assert_eq!(options.low_speed_time, Duration::from_secs(20));
        assert_eq!(options.max_redirections, 2);
        assert_eq!(options.user_agent.as_deref(), Some("fetchq-test"));
        assert!(options.buffer_size.is_none());
    }

    #[test]
    fn missing_curl_section_uses_transport_defaults() {
        let toml = r#"
            uses_buffer = true
            runs_in_background = false
        "#;
        let cfg: FetchConfig = toml::from_str(toml).unwrap();
        assert!(cfg.max_concurrent_connections.is_none());
        let options = cfg.curl_options();
        let builtin = CurlOptions::default();
        assert_eq!(options.connect_timeout, builtin.connect_timeout);
        assert_eq!(options.max_redirections, builtin.max_redirections);
    }

    #[test]
    fn load_or_init_creates_then_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let created = load_or_init_at(&path).unwrap();
        assert!(path.exists());
        assert!(created.uses_buffer);

        fs::write(&path, "max_concurrent_connections = 1\nuses_buffer = false\nruns_in_background = false\n").unwrap();
        let loaded = load_or_init_at(&path).unwrap();
        assert_eq!(loaded.max_concurrent_connections, Some(1));
        assert!(!loaded.uses_buffer);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "uses_buffer = \"maybe\"").unwrap();
        assert!(load_or_init_at(&path).is_err());
    }
}
