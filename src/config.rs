//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILMIRROR_CONFIG` (environment variable)
//! 2. `~/.config/mailmirror/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailmirror\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::export::ExportOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Remote API settings.
    pub remote: RemoteConfig,
    /// Export behavior.
    pub export: ExportConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Working directory holding `index/` and `caches/`.
    pub root_dir: PathBuf,
    /// Override directory for log files.
    pub log_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the export backend.
    pub base_url: String,
    /// JSON file holding `{"jwt": "..."}`. Defaults to `<root_dir>/jwt.json`.
    pub jwt_path: Option<PathBuf>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Export behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Record the SHA-256 of every stored attachment in `files_map.json`.
    pub hash_attachments: bool,
    /// Maximum nesting of item attachments that is followed.
    pub max_item_depth: usize,
    /// Subject characters kept in output-tree directory names.
    pub subject_chars: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(".mailmirror"),
            log_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            jwt_path: None,
            timeout_secs: 60,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            hash_attachments: true,
            max_item_depth: 8,
            subject_chars: 36,
        }
    }
}

impl Config {
    /// Path of the credential file.
    pub fn jwt_path(&self) -> PathBuf {
        self.remote
            .jwt_path
            .clone()
            .unwrap_or_else(|| self.general.root_dir.join("jwt.json"))
    }

    /// Engine options derived from the `[export]` section.
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            hash_attachments: self.export.hash_attachments,
            max_item_depth: self.export.max_item_depth,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILMIRROR_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailmirror").join("config.toml"))
}

/// Return the directory for log files.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailmirror")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.root_dir, PathBuf::from(".mailmirror"));
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.remote.timeout_secs, 60);
        assert!(cfg.export.hash_attachments);
        assert_eq!(cfg.export.max_item_depth, 8);
        assert_eq!(cfg.jwt_path(), PathBuf::from(".mailmirror").join("jwt.json"));
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.general.root_dir, cfg.general.root_dir);
        assert_eq!(parsed.remote.base_url, cfg.remote.base_url);
        assert_eq!(parsed.export.subject_chars, cfg.export.subject_chars);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[remote]
base_url = "https://export.example.com"
jwt_path = "/tmp/token.json"

[export]
hash_attachments = false
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.remote.base_url, "https://export.example.com");
        assert_eq!(cfg.jwt_path(), PathBuf::from("/tmp/token.json"));
        assert!(!cfg.export_options().hash_attachments);
        // Other fields use defaults
        assert_eq!(cfg.remote.timeout_secs, 60);
        assert_eq!(cfg.export_options().max_item_depth, 8);
    }
}
