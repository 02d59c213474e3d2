use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BridgeResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub storage: StorageConfig,
    pub ipc: IpcConfig,
    pub web_request: WebRequestConfig,
    pub protocol: ProtocolConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one folder per extension.
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Timeout for generic request/response calls. `None` waits forever.
    pub reply_timeout_ms: Option<u64>,
    /// Timeout for broadcast-and-await mutations (badge text).
    pub rendezvous_timeout_ms: u64,
    /// How long a `runtime.sendMessage` answer stays owed to its sender.
    pub message_response_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRequestConfig {
    /// How long a blocking listener may take before it counts as a no-op.
    pub listener_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub scheme: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// URL prefixes that never receive content scripts.
    pub injection_blacklist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let directory = dirs::data_dir()
            .map(|d| d.join("crxbridge").join("storage").join("extensions"))
            .unwrap_or_else(|| PathBuf::from("~/.crxbridge/storage/extensions"));

        Self {
            directory: directory.to_string_lossy().into_owned(),
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: None,
            rendezvous_timeout_ms: 5_000,
            message_response_timeout_ms: 300_000,
        }
    }
}

impl Default for WebRequestConfig {
    fn default() -> Self {
        Self {
            listener_timeout_ms: 10_000,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            scheme: "chrome-extension".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "crxbridge=info".to_string(),
        }
    }
}

impl StorageConfig {
    /// Storage root with `~` and environment variables expanded.
    pub fn resolved_directory(&self) -> PathBuf {
        PathBuf::from(shellexpand::full(&self.directory).map_or_else(
            |_| self.directory.clone(),
            |expanded| expanded.into_owned(),
        ))
    }
}

impl IpcConfig {
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }

    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_millis(self.rendezvous_timeout_ms)
    }

    pub fn message_response_timeout(&self) -> Duration {
        Duration::from_millis(self.message_response_timeout_ms)
    }
}

impl WebRequestConfig {
    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }
}

impl BridgeConfig {
    /// Default config file location
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("crxbridge")
            .join("config.toml")
    }

    /// Load config from the default location, or return defaults
    pub fn load_default() -> Self {
        match Self::load(&Self::config_path()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.validate();
        Ok(config)
    }

    /// Clamp values to ranges the bridge can work with
    fn validate(&mut self) {
        // Zero would turn every listener into an instant no-op.
        self.web_request.listener_timeout_ms = self.web_request.listener_timeout_ms.clamp(50, 120_000);
        self.ipc.rendezvous_timeout_ms = self.ipc.rendezvous_timeout_ms.clamp(50, 120_000);
        self.ipc.message_response_timeout_ms = self.ipc.message_response_timeout_ms.clamp(50, 3_600_000);

        if self.protocol.scheme.is_empty() {
            self.protocol.scheme = ProtocolConfig::default().scheme;
        }
    }
}
