//! TOML-based configuration for the synchronization core.
//!
//! Sensitive values (the SSH key passphrase) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Minimum tracing level for the integrating layer's subscriber.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Git work folder and commit settings.
    #[serde(default)]
    pub source_control: SourceControlConfig,

    /// Entity database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            source_control: SourceControlConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Source control
// ---------------------------------------------------------------------------

/// Work folder, remote, and commit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceControlConfig {
    /// Directory holding the cloned repository and the export tree.
    #[serde(default = "default_work_folder")]
    pub work_folder: PathBuf,

    /// Name of the git remote (default `origin`).
    #[serde(default = "default_remote_name")]
    pub remote_name: String,

    /// Commit message used when a push supplies none.
    #[serde(default = "default_commit_message")]
    pub default_commit_message: String,

    /// Default private key for SSH remotes, used when preferences carry none.
    #[serde(default)]
    pub key_pair_path: Option<PathBuf>,

    /// Environment variable holding the private key passphrase.
    #[serde(default)]
    pub key_passphrase_env: Option<String>,

    /// Contents of the README written by the bootstrap commit.
    #[serde(default = "default_readme")]
    pub readme_contents: String,

    /// Whether the source control feature is licensed on this instance.
    #[serde(default = "default_true")]
    pub licensed: bool,

    /// Resolved passphrase (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub key_passphrase: Option<String>,
}

fn default_work_folder() -> PathBuf {
    PathBuf::from("/var/lib/entitysync/git")
}
fn default_remote_name() -> String {
    crate::git::DEFAULT_REMOTE_NAME.into()
}
fn default_commit_message() -> String {
    "Updated by entitysync".into()
}
fn default_readme() -> String {
    "# Entity mirror\n\nThis repository is managed by source control sync.\n".into()
}
fn default_true() -> bool {
    true
}

impl Default for SourceControlConfig {
    fn default() -> Self {
        Self {
            work_folder: default_work_folder(),
            remote_name: default_remote_name(),
            default_commit_message: default_commit_message(),
            key_pair_path: None,
            key_passphrase_env: None,
            readme_contents: default_readme(),
            licensed: true,
            key_passphrase: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Entity database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/entitysync/entities.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// A missing variable logs a warning but does not fail; an unencrypted
    /// key needs no passphrase.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.source_control.key_passphrase_env {
            self.source_control.key_passphrase =
                resolve_optional_env(env_name, "source_control.key_passphrase_env");
        }
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_control.work_folder.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source_control.work_folder".into(),
                detail: "work folder must not be empty".into(),
            });
        }
        if self.source_control.remote_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source_control.remote_name".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        if self.source_control.default_commit_message.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source_control.default_commit_message".into(),
                detail: "default commit message must not be empty".into(),
            });
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database.path".into(),
                detail: "database path must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
log_level = "debug"

[source_control]
work_folder = "/tmp/entitysync/git"
remote_name = "upstream"
default_commit_message = "sync from staging"
key_pair_path = "/etc/entitysync/id_ed25519"
key_passphrase_env = "ENTITYSYNC_KEY_PASSPHRASE"
licensed = false

[database]
path = "/tmp/entitysync/entities.db"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.source_control.remote_name, "upstream");
        assert_eq!(
            config.source_control.key_pair_path.as_deref(),
            Some(Path::new("/etc/entitysync/id_ed25519"))
        );
        assert!(!config.source_control.licensed);
        assert_eq!(config.database.path, PathBuf::from("/tmp/entitysync/entities.db"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.source_control.default_commit_message, "sync from staging");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_empty_remote() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.source_control.remote_name = "  ".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "source_control.remote_name"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_ENTITYSYNC_PASSPHRASE", "hunter2");

        let toml_str = r#"
[source_control]
key_passphrase_env = "TEST_ENTITYSYNC_PASSPHRASE"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.source_control.key_passphrase.as_deref(), Some("hunter2"));

        std::env::remove_var("TEST_ENTITYSYNC_PASSPHRASE");
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.source_control.remote_name, "origin");
        assert_eq!(config.source_control.default_commit_message, "Updated by entitysync");
        assert!(config.source_control.licensed);
        assert!(config.source_control.readme_contents.starts_with("# "));
        config.validate().unwrap();
    }
}
