//! Server configuration: CLI flags layered over an optional TOML file.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use switchboard_bridge::DEFAULT_RING_CAPACITY;

/// Default bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Values a config file may provide.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    /// Bind address.
    pub bind: Option<SocketAddr>,
    /// Data directory for the launcher snapshot.
    pub data_dir: Option<PathBuf>,
    /// Claude-style CLI binary.
    pub claude_binary: Option<String>,
    /// Codex-style CLI binary.
    pub codex_binary: Option<String>,
    /// Per-session event ring capacity.
    pub ring_capacity: Option<usize>,
}

impl FileConfig {
    /// Parse a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Fully resolved server configuration. CLI flags win over the file;
/// unset values fall back to defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the WebSocket listener.
    pub bind: SocketAddr,
    /// Data directory for persistence.
    pub data_dir: PathBuf,
    /// Claude-style CLI binary.
    pub claude_binary: String,
    /// Codex-style CLI binary.
    pub codex_binary: String,
    /// Per-session event ring capacity.
    pub ring_capacity: usize,
}

impl ServerConfig {
    /// Merge CLI-provided values over the file config.
    #[must_use]
    pub fn resolve(
        file: FileConfig,
        bind: Option<SocketAddr>,
        data_dir: Option<PathBuf>,
        claude_binary: Option<String>,
        codex_binary: Option<String>,
        ring_capacity: Option<usize>,
    ) -> Self {
        Self {
            bind: bind
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.parse().expect("default bind is valid")),
            data_dir: data_dir
                .or(file.data_dir)
                .unwrap_or_else(default_data_dir),
            claude_binary: claude_binary
                .or(file.claude_binary)
                .unwrap_or_else(|| "claude".to_string()),
            codex_binary: codex_binary
                .or(file.codex_binary)
                .unwrap_or_else(|| "codex".to_string()),
            ring_capacity: ring_capacity
                .or(file.ring_capacity)
                .unwrap_or(DEFAULT_RING_CAPACITY),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "switchboard", "switchboard")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".switchboard"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_win_over_the_file() {
        let file = FileConfig {
            bind: Some("0.0.0.0:9000".parse().unwrap()),
            data_dir: Some(PathBuf::from("/var/lib/switchboard")),
            claude_binary: Some("claude-file".to_string()),
            codex_binary: None,
            ring_capacity: Some(256),
        };
        let config = ServerConfig::resolve(
            file,
            Some("127.0.0.1:9999".parse().unwrap()),
            None,
            None,
            Some("codex-cli".to_string()),
            None,
        );
        assert_eq!(config.bind.port(), 9999);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/switchboard"));
        assert_eq!(config.claude_binary, "claude-file");
        assert_eq!(config.codex_binary, "codex-cli");
        assert_eq!(config.ring_capacity, 256);
    }

    #[test]
    fn defaults_fill_everything_else() {
        let config = ServerConfig::resolve(FileConfig::default(), None, None, None, None, None);
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.claude_binary, "claude");
        assert_eq!(config.codex_binary, "codex");
        assert_eq!(config.ring_capacity, DEFAULT_RING_CAPACITY);
    }

    #[test]
    fn file_config_parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(
            &path,
            "bind = \"127.0.0.1:4242\"\nring_capacity = 1024\nclaude_binary = \"/opt/claude\"\n",
        )
        .unwrap();
        let file = FileConfig::load(&path).unwrap();
        assert_eq!(file.bind.unwrap().port(), 4242);
        assert_eq!(file.ring_capacity, Some(1024));
        assert_eq!(file.claude_binary.as_deref(), Some("/opt/claude"));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "bind = 42\n").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }
}
