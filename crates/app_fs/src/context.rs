//! Browsing context shared by every node of a request

use crate::archive::TarOptions;
use crate::encoding::system_fs_encoding;
use crate::exclude::{ExcludeFilter, ExclusionRules};
use crate::filename::{FsLimits, DEFAULT_FILENAME_ATTEMPTS};
use crate::guard::{canonicalize_lenient, to_absolute};
use crate::mimetype::{MimetypeDetector, MimetypeRegistry, DEFAULT_MIMETYPE};
use crate::node::Node;
use crate::sanitize::TargetOs;
use crate::{FsError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sandbox bases, feature flags and injected strategies
///
/// Built once at startup and shared immutably afterwards.
#[derive(Clone)]
pub struct BrowseContext {
    directory_base: PathBuf,
    directory_remove: Option<PathBuf>,
    directory_upload: Option<PathBuf>,
    downloadable: bool,
    use_binary_multiples: bool,
    tar: TarOptions,
    filename_attempts: u32,
    fs_limits: Option<FsLimits>,
    target_os: TargetOs,
    fs_encoding: String,
    mimetype: Arc<dyn MimetypeDetector>,
    exclude: Arc<dyn ExcludeFilter>,
}

impl BrowseContext {
    /// Create a context rooted at `base`, which must be an existing directory
    pub fn new<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        if !fs::metadata(base)?.is_dir() {
            return Err(FsError::InvalidPath(format!("Not a directory: {}", base.display())));
        }
        let base = canonicalize_lenient(base)?;

        tracing::info!("Browsing base: {}", base.display());

        Ok(Self {
            exclude: Arc::new(ExclusionRules::new(base.clone())),
            directory_base: base,
            directory_remove: None,
            directory_upload: None,
            downloadable: true,
            use_binary_multiples: true,
            tar: TarOptions::default(),
            filename_attempts: DEFAULT_FILENAME_ATTEMPTS,
            fs_limits: None,
            target_os: TargetOs::current(),
            fs_encoding: system_fs_encoding(),
            mimetype: Arc::new(MimetypeRegistry::new()),
        })
    }

    /// Allow removal of everything strictly below `path`
    pub fn with_remove_base<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.directory_remove = Some(canonicalize_lenient(path.as_ref())?);
        Ok(self)
    }

    /// Allow uploads into `path` and every directory below it
    pub fn with_upload_base<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.directory_upload = Some(canonicalize_lenient(path.as_ref())?);
        Ok(self)
    }

    pub fn with_downloadable(mut self, downloadable: bool) -> Self {
        self.downloadable = downloadable;
        self
    }

    pub fn with_binary_multiples(mut self, binary: bool) -> Self {
        self.use_binary_multiples = binary;
        self
    }

    pub fn with_tar_options(mut self, options: TarOptions) -> Self {
        self.tar = options;
        self
    }

    pub fn with_filename_attempts(mut self, attempts: u32) -> Self {
        self.filename_attempts = attempts;
        self
    }

    /// Use fixed limits instead of asking the filesystem
    pub fn with_fs_limits(mut self, limits: FsLimits) -> Self {
        self.fs_limits = Some(limits);
        self
    }

    pub fn with_target_os(mut self, target: TargetOs) -> Self {
        self.target_os = target;
        self
    }

    pub fn with_fs_encoding(mut self, label: impl Into<String>) -> Self {
        self.fs_encoding = label.into();
        self
    }

    pub fn with_mimetype_detector<D: MimetypeDetector + 'static>(mut self, detector: D) -> Self {
        self.mimetype = Arc::new(detector);
        self
    }

    pub fn with_exclude<E: ExcludeFilter + 'static>(mut self, exclude: E) -> Self {
        self.exclude = Arc::new(exclude);
        self
    }

    pub fn base(&self) -> &Path {
        &self.directory_base
    }

    pub fn remove_base(&self) -> Option<&Path> {
        self.directory_remove.as_deref()
    }

    pub fn upload_base(&self) -> Option<&Path> {
        self.directory_upload.as_deref()
    }

    pub fn downloadable(&self) -> bool {
        self.downloadable
    }

    pub fn use_binary_multiples(&self) -> bool {
        self.use_binary_multiples
    }

    pub fn tar_options(&self) -> &TarOptions {
        &self.tar
    }

    pub fn filename_attempts(&self) -> u32 {
        self.filename_attempts
    }

    pub fn fs_limits(&self) -> Option<FsLimits> {
        self.fs_limits
    }

    pub fn target_os(&self) -> TargetOs {
        self.target_os
    }

    pub fn fs_encoding(&self) -> &str {
        &self.fs_encoding
    }

    pub fn exclude(&self) -> &Arc<dyn ExcludeFilter> {
        &self.exclude
    }

    pub fn is_excluded(&self, path: &Path, follow_symlinks: bool) -> bool {
        self.exclude.is_excluded(path, follow_symlinks)
    }

    /// Detect the mimetype of a file
    pub fn mimetype(&self, path: &Path) -> String {
        self.mimetype
            .detect(path)
            .unwrap_or_else(|| DEFAULT_MIMETYPE.to_string())
    }

    /// Translate a URL path into a node
    ///
    /// Paths outside the base and excluded paths are both reported as not
    /// found.
    pub fn resolve(self: &Arc<Self>, urlpath: &str) -> Result<Node> {
        let path = to_absolute(urlpath, &self.directory_base)?;
        if self.is_excluded(&path, false) {
            tracing::debug!("Refused excluded path {:?}", urlpath);
            return Err(FsError::NotFound(urlpath.to_string()));
        }
        Node::from_path(path, Arc::clone(self))
    }
}

impl std::fmt::Debug for BrowseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowseContext")
            .field("directory_base", &self.directory_base)
            .field("directory_remove", &self.directory_remove)
            .field("directory_upload", &self.directory_upload)
            .field("downloadable", &self.downloadable)
            .field("use_binary_multiples", &self.use_binary_multiples)
            .field("tar", &self.tar)
            .field("filename_attempts", &self.filename_attempts)
            .field("target_os", &self.target_os)
            .field("fs_encoding", &self.fs_encoding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FsNode;
    use crate::GlobExclude;
    use tempfile::TempDir;

    fn context() -> (TempDir, Arc<BrowseContext>) {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs").join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("notes.tmp"), b"tmp").unwrap();

        let ctx = BrowseContext::new(dir.path()).unwrap();
        let glob = GlobExclude::new(&["*.tmp"], ctx.base()).unwrap();
        let rules = ExclusionRules::new(ctx.base()).with(glob);
        (dir, Arc::new(ctx.with_exclude(rules)))
    }

    #[test]
    fn test_base_must_be_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(BrowseContext::new(&file), Err(FsError::InvalidPath(_))));
        assert!(matches!(BrowseContext::new(dir.path().join("missing")), Err(FsError::Io(_))));
    }

    #[test]
    fn test_resolve_variants() {
        let (_dir, ctx) = context();

        let root = ctx.resolve("").unwrap();
        assert!(root.is_directory());
        assert_eq!(root.urlpath().unwrap(), "");

        let docs = ctx.resolve("docs").unwrap();
        assert!(docs.is_directory());

        let file = ctx.resolve("docs/a.txt").unwrap();
        assert!(!file.is_directory());
        assert_eq!(file.urlpath().unwrap(), "docs/a.txt");
    }

    #[test]
    fn test_resolve_refusals() {
        let (_dir, ctx) = context();
        assert!(matches!(ctx.resolve("../.."), Err(FsError::BoundaryViolation { .. })));
        assert!(matches!(ctx.resolve("notes.tmp"), Err(FsError::NotFound(_))));
        assert!(matches!(ctx.resolve("missing"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_default_mimetype() {
        let (_dir, ctx) = context();
        assert_eq!(ctx.mimetype(Path::new("x.txt")), "text/plain");
        assert_eq!(ctx.mimetype(Path::new("x")), DEFAULT_MIMETYPE);

        let custom = (*ctx).clone().with_mimetype_detector(|_: &Path| -> Option<String> { None });
        assert_eq!(custom.mimetype(Path::new("x.txt")), DEFAULT_MIMETYPE);
    }
}
