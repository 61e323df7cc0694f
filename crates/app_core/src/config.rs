//! Application configuration

use anyhow::Context;
use app_fs::{TarOptions, DEFAULT_FILENAME_ATTEMPTS};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable pointing at a settings file
pub const SETTINGS_ENV: &str = "BROWSEFS_SETTINGS";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub directory: DirectoryConfig,
    pub tar: TarOptions,
    pub display: DisplayConfig,
    pub exclude: ExcludeConfig,
    pub upload: UploadConfig,
    pub log: LogConfig,
}

/// Sandbox and permission bases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Root of everything that can be browsed
    pub base: PathBuf,
    /// Directory shown when no path is given
    pub start: Option<PathBuf>,
    /// Everything strictly below this path can be removed
    pub remove: Option<PathBuf>,
    /// Uploads are accepted in this path and below
    pub upload: Option<PathBuf>,
    /// Whether directories can be downloaded as archives
    pub downloadable: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base: PathBuf::from("."),
            start: None,
            remove: None,
            upload: None,
            downloadable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// KiB/MiB (1024) instead of KB/MB (1000)
    pub use_binary_multiples: bool,
    /// Listing order, e.g. `"name"` or `"-modified"`
    pub sort: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            use_binary_multiples: true,
            sort: "name".to_string(),
        }
    }
}

/// Hidden paths
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludeConfig {
    /// Glob patterns
    pub patterns: Vec<String>,
    /// Files holding more patterns, one per line
    pub from: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Numbered names tried before random ones
    pub filename_attempts: u32,
    /// Filesystem encoding label, detected from the locale when unset
    pub fs_encoding: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            filename_attempts: DEFAULT_FILENAME_ATTEMPTS,
            fs_encoding: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    /// Also write JSON logs to the log directory
    pub file: bool,
    /// Log files older than this are deleted at startup
    pub retain_days: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: false,
            retain_days: 7,
        }
    }
}

impl AppConfig {
    /// Load configuration
    ///
    /// Lookup order: `path`, then `$BROWSEFS_SETTINGS`, then the user
    /// configuration file, then defaults. Explicit files must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }

        if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|v| !v.is_empty()) {
            return Self::load_from(Path::new(&path));
        }

        let config_path = Self::config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("Using default configuration");
            Ok(Self::default())
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration {:?}", path))?;
        config.validate()?;

        tracing::info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    /// Reject values the browsing layer cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tar.buffsize == 0 {
            anyhow::bail!("tar.buffsize must be greater than zero");
        }
        Ok(())
    }

    /// Save configuration to the user configuration file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration as pretty TOML
    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        tracing::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "browsefs", "browsefs")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_fs::TarCompression;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.directory.downloadable);
        assert!(config.directory.remove.is_none());
        assert!(config.display.use_binary_multiples);
        assert_eq!(config.tar.buffsize, 10240);
        assert_eq!(config.tar.compression, TarCompression::Gzip);
        assert_eq!(config.tar.level, 1);
        assert_eq!(config.upload.filename_attempts, 999);
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("browsefs.toml");
        std::fs::write(
            &path,
            r#"
[directory]
base = "/srv/music"
remove = "/srv/music/inbox"

[tar]
compression = "xz"

[exclude]
patterns = ["*.tmp", "/private"]
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.directory.base, PathBuf::from("/srv/music"));
        assert_eq!(config.directory.remove, Some(PathBuf::from("/srv/music/inbox")));
        assert!(config.directory.downloadable);
        assert_eq!(config.tar.compression, TarCompression::Xz);
        assert_eq!(config.tar.buffsize, 10240);
        assert_eq!(config.exclude.patterns, vec!["*.tmp", "/private"]);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.directory.upload = Some(PathBuf::from("/srv/upload"));
        config.display.sort = "-size".to_string();
        config.save_to(&path).unwrap();

        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");

        std::fs::write(&path, "[tar]\nbuffsize = 0\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());

        std::fs::write(&path, "[tar]\ncompression = \"zip\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        assert!(AppConfig::load(Some(dir.path().join("missing.toml").as_path())).is_err());
    }
}
