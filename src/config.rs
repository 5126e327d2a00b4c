//! Server settings.
//!
//! Loaded from a YAML file named by `PEBBLE_CONFIG`, falling back to
//! defaults for anything missing. `LISTEN` overrides the listen address.
//!
//! ```yaml
//! listen_addr: "0.0.0.0:8080"
//! max_connections: 16
//! temp_root: /var/tmp/pebble
//! document_root: ./www
//! max_request_length_bytes: 4194304
//! request_length_disk_threshold_bytes: 262144
//! custom_error_folder: ./errors
//! handlers:
//!   - verb: "GET, HEAD"
//!     path: "^/.*$"
//!     handler: static
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http::body::{READ_CHUNK_SIZE, ReadSettings};
use crate::http::response::StatusCode;

pub const CONFIG_ENV: &str = "PEBBLE_CONFIG";
pub const LISTEN_ENV: &str = "LISTEN";

/// One `(verbs, path regex, handler name)` routing entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HandlerConfig {
    #[serde(default = "default_verb")]
    pub verb: String,
    pub path: String,
    pub handler: String,
}

fn default_verb() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Distinct peer addresses served at once. 0 means no limit.
    pub max_connections: usize,
    pub temp_root: PathBuf,
    pub document_root: PathBuf,
    pub max_request_length_bytes: usize,
    /// Request bodies above this size are buffered in a temp file.
    pub request_length_disk_threshold_bytes: usize,
    pub tls: bool,
    /// Serve more than one request per connection.
    pub keep_alive: bool,
    pub body_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub custom_error_folder: Option<PathBuf>,
    pub server_name: String,
    /// Status for requests above `max_request_length_bytes` (413 or 500).
    pub oversize_status: u16,
    pub handlers: Vec<HandlerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            max_connections: 16,
            temp_root: std::env::temp_dir(),
            document_root: PathBuf::from("www"),
            max_request_length_bytes: 4 * 1024 * 1024,
            request_length_disk_threshold_bytes: crate::http::raw::DEFAULT_DISK_THRESHOLD,
            tls: false,
            keep_alive: false,
            body_timeout_secs: 30,
            request_timeout_secs: 120,
            custom_error_folder: None,
            server_name: concat!("pebble/", env!("CARGO_PKG_VERSION")).to_string(),
            oversize_status: 413,
            handlers: vec![HandlerConfig {
                verb: "GET, HEAD".to_string(),
                path: "^/.*$".to_string(),
                handler: "static".to_string(),
            }],
        }
    }
}

impl Config {
    /// Defaults, overlaid by the `PEBBLE_CONFIG` file and the `LISTEN` variable.
    pub fn load() -> Self {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) => match Config::from_file(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Falling back to default configuration");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        };

        if let Ok(addr) = std::env::var(LISTEN_ENV) {
            cfg.listen_addr = addr;
        }
        cfg
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Config::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.oversize_status, 413 | 500) {
            anyhow::bail!("oversize_status must be 413 or 500, got {}", self.oversize_status);
        }
        if self.body_timeout_secs == 0 || self.request_timeout_secs == 0 {
            anyhow::bail!("timeouts must be at least one second");
        }
        Ok(())
    }

    pub fn body_timeout(&self) -> Duration {
        Duration::from_secs(self.body_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn oversize_status(&self) -> StatusCode {
        StatusCode::from_u16(self.oversize_status).unwrap_or(StatusCode::PayloadTooLarge)
    }

    pub fn read_settings(&self) -> ReadSettings {
        ReadSettings {
            temp_root: self.temp_root.clone(),
            disk_threshold: self.request_length_disk_threshold_bytes,
            max_request_length: self.max_request_length_bytes,
            oversize_status: self.oversize_status(),
            body_timeout: self.body_timeout(),
            chunk_size: READ_CHUNK_SIZE,
        }
    }
}
