use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use chat_stream::SessionClientConfig;

// =============================================================================
// Tunable config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [server]
//                    api_base = "https://chat.example.com"
//
//   env var:         CHAT_SERVER__API_BASE=https://chat.example.com
//
//   (double underscore = nesting; single underscore stays within field names:
//    CHAT_CONNECTION__RECONNECT_DELAY_MS=500)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
}

/// Service endpoints (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    /// Base URL of the session directory and credential endpoints.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Websocket endpoint that streams replies.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_url: default_ws_url(),
        }
    }
}

/// Connection tunables (lives under `[connection]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_api_base() -> String {
    "http://localhost:8000".to_string()
}
fn default_ws_url() -> String {
    "ws://localhost:8000/ws/chat".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    3000
}

/// Build a figment that layers: defaults → config.toml → CHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `CHAT_SERVER__WS_URL=ws://host/ws/chat`  →  `server.ws_url = "ws://host/ws/chat"`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CHAT_").split("__"))
}

// =============================================================================
// Runtime settings (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base: String,
    pub ws_url: String,
    pub reconnect_delay: Duration,
}

impl ClientSettings {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            api_base: fc.server.api_base.clone(),
            ws_url: fc.server.ws_url.clone(),
            reconnect_delay: Duration::from_millis(fc.connection.reconnect_delay_ms),
        }
    }

    pub fn load(config: &ChatConfig) -> Result<Self> {
        let fc: FileConfig = load_config(&config.data_dir)
            .extract()
            .with_context(|| {
                format!(
                    "Invalid configuration ({} or CHAT_* env)",
                    config.config_toml_path().display()
                )
            })?;
        let settings = Self::from_file(&fc);
        debug!(api_base = %settings.api_base, ws_url = %settings.ws_url, "loaded settings");
        Ok(settings)
    }

    pub fn session_config(&self) -> SessionClientConfig {
        SessionClientConfig {
            ws_url: self.ws_url.clone(),
            reconnect_delay: self.reconnect_delay,
        }
    }
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub data_dir: PathBuf,
}

impl ChatConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".chat"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        debug!("Data directory: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join("token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.server.api_base, "http://localhost:8000");
        assert_eq!(fc.server.ws_url, "ws://localhost:8000/ws/chat");
        assert_eq!(fc.connection.reconnect_delay_ms, 3000);
    }

    // ── ClientSettings ──────────────────────────────────────────────────

    #[test]
    fn test_settings_from_file() {
        let fc = FileConfig {
            server: ServerFileConfig {
                api_base: "https://api.example.com".into(),
                ws_url: "wss://api.example.com/ws/chat".into(),
            },
            connection: ConnectionFileConfig {
                reconnect_delay_ms: 250,
            },
        };
        let settings = ClientSettings::from_file(&fc);
        assert_eq!(settings.api_base, "https://api.example.com");
        assert_eq!(settings.reconnect_delay, Duration::from_millis(250));

        let sc = settings.session_config();
        assert_eq!(sc.ws_url, "wss://api.example.com/ws/chat");
        assert_eq!(sc.reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_default_settings_use_three_second_delay() {
        let settings = ClientSettings::from_file(&FileConfig::default());
        assert_eq!(
            settings.session_config().reconnect_delay,
            chat_stream::DEFAULT_RECONNECT_DELAY
        );
    }

    // ── ChatConfig ──────────────────────────────────────────────────────

    #[test]
    fn test_chat_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/data");
        let config = ChatConfig::new(Some(dir.clone())).unwrap();

        assert_eq!(config.data_dir, dir);
        assert!(dir.exists());
        assert_eq!(config.config_toml_path(), dir.join("config.toml"));
        assert_eq!(config.token_path(), dir.join("token"));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.api_base, "http://localhost:8000");
        assert_eq!(fc.connection.reconnect_delay_ms, 3000);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[server]\nws_url = \"ws://10.0.0.2:9000/ws/chat\"\n\n[connection]\nreconnect_delay_ms = 500\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.ws_url, "ws://10.0.0.2:9000/ws/chat");
        // Untouched keys keep their defaults.
        assert_eq!(fc.server.api_base, "http://localhost:8000");
        assert_eq!(fc.connection.reconnect_delay_ms, 500);
    }

    #[test]
    fn test_settings_load_rejects_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[connection]\nreconnect_delay_ms = \"soon\"\n",
        )
        .unwrap();
        let config = ChatConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        assert!(ClientSettings::load(&config).is_err());
    }
}
