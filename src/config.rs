//! Application configuration.
//!
//! The configuration is loaded from a JSON file.  The top-level schema uses
//! a `"session"` key so the file can be extended with additional sections
//! later without breaking backward compatibility.
//!
//! # Example
//!
//! ```json
//! {
//!   "session": {
//!     "query_timeout_ms": 2000,
//!     "framing": "json",
//!     "read_buffer_size": 4096,
//!     "max_frame_bytes": 1048576,
//!     "bootstrap": true
//!   }
//! }
//! ```

use crate::ipc::codec::{Framing, DEFAULT_MAX_FRAME_BYTES};
use crate::ipc::transport::DEFAULT_READ_BUFFER_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
///
/// Every field is optional; a minimal `{}` file is valid and all sections
/// fall back to their compiled-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session tunables.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Session tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on how long a query waits for its reply (ms).  `null`
    /// waits until the reply arrives or the stream ends.  Default: `5000`.
    pub query_timeout_ms: Option<u64>,
    /// How messages are delimited on the socket.  Default: `"json"`.
    pub framing: Framing,
    /// Size of each socket read (bytes).  Default: `4096`.
    pub read_buffer_size: usize,
    /// Largest inbound frame the reader will buffer (bytes).  Anything
    /// bigger is dropped up to the next newline.  Default: 1 MiB.
    pub max_frame_bytes: usize,
    /// Issue `get_workspaces` and `get_active_window` on start.
    /// Default: `true`.
    pub bootstrap: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: Some(5000),
            framing: Framing::Json,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            bootstrap: true,
        }
    }
}

impl SessionConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }
}

/// Error from loading or parsing a configuration file.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_full_config() {
        let json = r#"{
            "session": {
                "query_timeout_ms": 250,
                "framing": "chunk",
                "read_buffer_size": 1024,
                "max_frame_bytes": 65536,
                "bootstrap": false
            }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.session.query_timeout_ms, Some(250));
        assert_eq!(cfg.session.framing, Framing::Chunk);
        assert_eq!(cfg.session.read_buffer_size, 1024);
        assert_eq!(cfg.session.max_frame_bytes, 65536);
        assert!(!cfg.session.bootstrap);
        assert_eq!(cfg.session.query_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.session, SessionConfig::default());
        assert_eq!(cfg.session.query_timeout_ms, Some(5000));
        assert_eq!(cfg.session.framing, Framing::Json);
        assert_eq!(cfg.session.read_buffer_size, 4096);
        assert_eq!(cfg.session.max_frame_bytes, 1 << 20);
        assert!(cfg.session.bootstrap);
    }

    #[test]
    fn deserialize_partial_session() {
        let cfg: Config = serde_json::from_str(r#"{ "session": { "framing": "chunk" } }"#).unwrap();
        assert_eq!(cfg.session.framing, Framing::Chunk);
        assert_eq!(cfg.session.query_timeout_ms, Some(5000));
    }

    #[test]
    fn null_timeout_disables_deadline() {
        let cfg: Config =
            serde_json::from_str(r#"{ "session": { "query_timeout_ms": null } }"#).unwrap();
        assert_eq!(cfg.session.query_timeout(), None);
    }

    #[test]
    fn unknown_top_level_keys_ignored() {
        let json = r#"{ "session": {}, "future_section": { "key": 42 } }"#;
        let _cfg: Config = serde_json::from_str(json).unwrap();
    }

    #[test]
    fn load_reports_missing_file() {
        let path = std::env::temp_dir().join(format!(
            "wsmirror-missing-config-{}.json",
            std::process::id()
        ));
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join(format!(
            "wsmirror-config-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{ "session": { "bootstrap": false } }"#).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert!(!cfg.session.bootstrap);
        let _ = std::fs::remove_file(&path);
    }
}
