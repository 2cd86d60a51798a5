use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Config file name inside the data directory
pub const CONFIG_FILE: &str = "bridge.toml";

/// Data directory name under `$HOME` when nothing else is given
const DEFAULT_DATA_DIR: &str = ".inboxer-bridge";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub imap: ImapConfig,
}

/// Backend REST API settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Base URL; requests go to `<url>/api/...`
    #[serde(default = "default_api_url")]
    pub url: String,
    /// Token used for the startup health probe. Clients log in with their own.
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            token: None,
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8787".to_string()
}

/// IMAP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImapConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name shown in the greeting and BYE
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1143
}

fn default_server_name() -> String {
    "Inboxer IMAP bridge".to_string()
}

impl BridgeConfig {
    /// Load `bridge.toml` from the data directory, then apply environment
    /// overrides. A missing file means defaults.
    pub async fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);

        let mut config = match fs::read_to_string(&path).await {
            Ok(content) => toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BridgeConfig::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables override config file values
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("INBOXER_API_URL") {
            self.api.url = url;
        }
        if let Some(token) = var("INBOXER_API_TOKEN") {
            self.api.token = Some(token);
        }
        if let Some(host) = var("BRIDGE_HOST") {
            self.imap.host = host;
        }
        if let Some(port) = var("IMAP_PORT") {
            match port.parse() {
                Ok(port) => self.imap.port = port,
                Err(_) => tracing::warn!("Ignoring invalid IMAP_PORT {:?}", port),
            }
        }
    }

    /// `host:port` for the IMAP listener; the host may be a name
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.imap.host, self.imap.port)
    }

    /// Generate a sample configuration file
    pub fn sample() -> Result<String, toml::ser::Error> {
        let sample = BridgeConfig {
            api: ApiConfig {
                url: default_api_url(),
                token: Some("your-api-token".to_string()),
            },
            imap: ImapConfig::default(),
        };
        toml::to_string_pretty(&sample)
    }
}

/// Data directory: explicit argument, then `BRIDGE_DATA_DIR`, then
/// `$HOME/.inboxer-bridge`
pub fn data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os("BRIDGE_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_DATA_DIR)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = BridgeConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.imap.server_name, "Inboxer IMAP bridge");
        assert_eq!(BridgeConfig::default().imap.port, 1143);
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[api]\nurl = \"https://mail.example.com\"\n\n[imap]\nport = 2143\n",
        )
        .unwrap();

        let config = BridgeConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.imap.server_name, "Inboxer IMAP bridge");

        // Without environment overrides the file values stand
        let content = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        let parsed: BridgeConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.api.url, "https://mail.example.com");
        assert_eq!(parsed.imap.port, 2143);
        assert_eq!(parsed.imap.host, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[imap\nport = ").unwrap();

        let err = BridgeConfig::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("INBOXER_API_URL", "http://api.internal:9000"),
            ("INBOXER_API_TOKEN", "secret"),
            ("IMAP_PORT", "not-a-port"),
            ("BRIDGE_HOST", "0.0.0.0"),
        ]
        .into_iter()
        .collect();

        let mut config = BridgeConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.api.url, "http://api.internal:9000");
        assert_eq!(config.api.token.as_deref(), Some("secret"));
        assert_eq!(config.imap.port, 1143);
        assert_eq!(config.listen_addr(), "0.0.0.0:1143");
    }

    #[test]
    fn test_sample_round_trips() {
        let sample = BridgeConfig::sample().unwrap();
        let parsed: BridgeConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.api.token.as_deref(), Some("your-api-token"));
        assert_eq!(parsed.imap, ImapConfig::default());
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        assert_eq!(data_dir(Some(PathBuf::from("/tmp/x"))), PathBuf::from("/tmp/x"));
    }
}
