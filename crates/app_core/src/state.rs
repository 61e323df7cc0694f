//! Application state management

use crate::{AppConfig, AppError};
use app_fs::{
    collect_exclude_patterns, to_relative, BrowseContext, ExclusionRules, GlobExclude, SortBy,
};
use std::path::Path;
use std::sync::Arc;

/// Main application state
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Browsing context shared by every request
    pub context: Arc<BrowseContext>,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let context = build_context(&config)?;
        Ok(Self {
            config,
            context: Arc::new(context),
        })
    }

    /// URL path of the configured start directory, the base by default
    pub fn start_urlpath(&self) -> Result<String, AppError> {
        match &self.config.directory.start {
            Some(start) => {
                let start = app_fs::canonicalize_lenient(start)?;
                Ok(to_relative(&start, self.context.base())?)
            }
            None => Ok(String::new()),
        }
    }

    /// Configured listing order
    pub fn default_sort(&self) -> Option<(SortBy, bool)> {
        SortBy::parse_property(&self.config.display.sort)
    }

    /// Save the current configuration
    pub fn save_config(&self) -> anyhow::Result<()> {
        self.config.save()
    }
}

fn build_context(config: &AppConfig) -> Result<BrowseContext, AppError> {
    let dirs = &config.directory;

    let mut context = BrowseContext::new(&dirs.base)?
        .with_downloadable(dirs.downloadable)
        .with_binary_multiples(config.display.use_binary_multiples)
        .with_tar_options(config.tar.clone())
        .with_filename_attempts(config.upload.filename_attempts);

    if let Some(label) = &config.upload.fs_encoding {
        context = context.with_fs_encoding(label.clone());
    }
    if let Some(remove) = &dirs.remove {
        context = context.with_remove_base(remove)?;
    }
    if let Some(upload) = &dirs.upload {
        context = context.with_upload_base(upload)?;
    }

    let rules = exclusion_rules(config, context.base())?;
    Ok(context.with_exclude(rules))
}

fn exclusion_rules(config: &AppConfig, base: &Path) -> Result<ExclusionRules, AppError> {
    let mut patterns = config.exclude.patterns.clone();
    patterns.extend(collect_exclude_patterns(&config.exclude.from)?);

    let mut rules = ExclusionRules::new(base);
    if !patterns.is_empty() {
        tracing::debug!("{} exclude patterns", patterns.len());
        rules.add(GlobExclude::new(&patterns, base)?);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_fs::FsNode;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.directory.base = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_context_from_config() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("inbox")).unwrap();
        fs::write(dir.path().join("a.tmp"), b"x").unwrap();
        fs::write(dir.path().join("b.txt"), b"x").unwrap();

        let mut config = config_for(&dir);
        config.directory.remove = Some(dir.path().join("inbox"));
        config.directory.downloadable = false;
        config.exclude.patterns = vec!["*.tmp".to_string()];

        let state = AppState::new(config).unwrap();
        let ctx = &state.context;
        assert!(ctx.remove_base().is_some());
        assert!(!ctx.downloadable());

        let root = ctx.resolve("").unwrap();
        let names: Vec<String> = root
            .as_directory()
            .unwrap()
            .listdir(None, false)
            .unwrap()
            .iter()
            .map(|n| n.name())
            .collect();
        assert!(names.contains(&"b.txt".to_string()));
        assert!(!names.contains(&"a.tmp".to_string()));
    }

    #[test]
    fn test_exclude_from_file() {
        let dir = TempDir::new().unwrap();
        let patterns = TempDir::new().unwrap();
        let list = patterns.path().join("exclude.txt");
        fs::write(&list, "# hidden\nsecret\n").unwrap();
        fs::write(dir.path().join("secret"), b"x").unwrap();

        let mut config = config_for(&dir);
        config.exclude.from = vec![list];

        let state = AppState::new(config).unwrap();
        assert!(matches!(state.context.resolve("secret"), Err(app_fs::FsError::NotFound(_))));
    }

    #[test]
    fn test_start_urlpath() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("music").join("new")).unwrap();

        let mut config = config_for(&dir);
        config.directory.start = Some(dir.path().join("music").join("new"));
        let state = AppState::new(config).unwrap();
        assert_eq!(state.start_urlpath().unwrap(), "music/new");

        let mut config = config_for(&dir);
        config.directory.start = Some(std::env::temp_dir());
        let state = AppState::new(config).unwrap();
        assert!(matches!(state.start_urlpath(), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_missing_base() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir);
        config.directory.base = dir.path().join("missing");
        assert!(AppState::new(config).is_err());
    }
}
