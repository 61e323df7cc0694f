//! File and directory nodes
//!
//! Nodes are cheap to build: nothing touches the filesystem until an
//! attribute is read, and every attribute is cached for the lifetime of the
//! node. Nodes live for a single request, caches are not thread-safe.

use crate::archive::TarStream;
use crate::browser::SortBy;
use crate::context::BrowseContext;
use crate::filename::{self, FsLimits};
use crate::format::human_size;
use crate::guard::{is_under, is_within, paths_equal, to_relative};
use crate::mimetype::DIRECTORY_MIMETYPE;
use crate::sanitize::secure_filename;
use crate::{FsError, Operation, Result};
use once_cell::unsync::OnceCell;
use std::fs::{self, Metadata, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

const MODIFIED_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// Path, context and cached attributes common to every node
pub struct NodeBase {
    path: PathBuf,
    context: Arc<BrowseContext>,
    is_symlink: OnceCell<bool>,
    is_excluded: OnceCell<bool>,
    stats: OnceCell<Metadata>,
    mimetype: OnceCell<String>,
    parent: OnceCell<Option<Box<DirectoryNode>>>,
}

impl NodeBase {
    fn new(path: PathBuf, context: Arc<BrowseContext>) -> Self {
        Self {
            path,
            context,
            is_symlink: OnceCell::new(),
            is_excluded: OnceCell::new(),
            stats: OnceCell::new(),
            mimetype: OnceCell::new(),
            parent: OnceCell::new(),
        }
    }
}

/// Read-only views shared by files and directories
pub trait FsNode {
    fn base(&self) -> &NodeBase;

    fn is_directory(&self) -> bool;

    fn mimetype(&self) -> &str;

    /// Human readable size, files only
    fn size(&self) -> Option<String>;

    fn can_remove(&self) -> bool;

    fn remove(&self) -> Result<()>;

    fn path(&self) -> &Path {
        &self.base().path
    }

    fn context(&self) -> &Arc<BrowseContext> {
        &self.base().context
    }

    /// Path relative to the browsing base, `/` separated
    fn urlpath(&self) -> Result<String> {
        to_relative(self.path(), self.context().base())
    }

    /// Basename, or the whole path when there is none
    fn name(&self) -> String {
        match self.path().file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.path().display().to_string(),
        }
    }

    fn is_symlink(&self) -> bool {
        *self.base().is_symlink.get_or_init(|| {
            fs::symlink_metadata(self.path())
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false)
        })
    }

    /// Metadata of the target, or of the link itself when dangling
    fn stats(&self) -> Result<&Metadata> {
        let stats = self.base().stats.get_or_try_init(|| match fs::metadata(self.path()) {
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.is_symlink() => {
                fs::symlink_metadata(self.path())
            }
            other => other,
        })?;
        Ok(stats)
    }

    fn mtime(&self) -> Option<SystemTime> {
        self.stats().ok()?.modified().ok()
    }

    /// Modification time as local `YYYY.MM.DD HH:MM:SS`
    fn modified(&self) -> Option<String> {
        let mtime = chrono::DateTime::<chrono::Local>::from(self.mtime()?);
        Some(mtime.format(MODIFIED_FORMAT).to_string())
    }

    fn is_excluded(&self) -> bool {
        *self.base().is_excluded.get_or_init(|| {
            self.context().is_excluded(self.path(), self.is_symlink())
        })
    }

    /// Containing directory, none for the base and the filesystem root
    fn parent(&self) -> Option<&DirectoryNode> {
        self.base()
            .parent
            .get_or_init(|| {
                let context = self.context();
                if paths_equal(self.path(), context.base()) {
                    return None;
                }
                let parent = self.path().parent()?;
                if !is_within(parent, context.base()) {
                    return None;
                }
                Some(Box::new(DirectoryNode::new(parent.to_path_buf(), Arc::clone(context))))
            })
            .as_deref()
    }

    /// Parents up to the base, nearest first
    fn ancestors(&self) -> Vec<&DirectoryNode> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(dir) = current {
            ancestors.push(dir);
            current = dir.parent();
        }
        ancestors
    }

    /// `charset` parameter of the mimetype
    fn encoding(&self) -> &str {
        self.mimetype()
            .split(';')
            .skip(1)
            .find_map(|param| {
                let (key, value) = param.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("charset")
                    .then(|| value.trim().trim_matches('"'))
            })
            .unwrap_or("default")
    }

    /// Mimetype without parameters
    fn media_type(&self) -> &str {
        self.mimetype().split(';').next().unwrap_or("").trim()
    }

    /// Top level of the media type (`text`, `audio`, ...)
    fn category(&self) -> &str {
        self.media_type().split('/').next().unwrap_or("")
    }
}

/// Regular file, or anything that is not a directory
pub struct FileNode {
    base: NodeBase,
}

impl FileNode {
    pub fn new(path: PathBuf, context: Arc<BrowseContext>) -> Self {
        Self {
            base: NodeBase::new(path, context),
        }
    }
}

impl FsNode for FileNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn is_directory(&self) -> bool {
        false
    }

    fn mimetype(&self) -> &str {
        self.base.mimetype.get_or_init(|| self.context().mimetype(self.path()))
    }

    fn size(&self) -> Option<String> {
        let stats = self.stats().ok()?;
        Some(human_size(stats.len(), self.context().use_binary_multiples()))
    }

    fn can_remove(&self) -> bool {
        match self.context().remove_base() {
            Some(base) => is_under(self.path(), base),
            None => false,
        }
    }

    fn remove(&self) -> Result<()> {
        if !self.can_remove() {
            return Err(FsError::PermissionDenied {
                path: self.path().to_path_buf(),
                operation: Operation::Remove,
            });
        }
        fs::remove_file(self.path())?;
        tracing::info!("Removed file {:?}", self.path());
        Ok(())
    }
}

/// Directory with a cached, unordered listing
pub struct DirectoryNode {
    base: NodeBase,
    listing: OnceCell<Vec<Node>>,
    limits: OnceCell<FsLimits>,
}

impl DirectoryNode {
    pub fn new(path: PathBuf, context: Arc<BrowseContext>) -> Self {
        Self {
            base: NodeBase::new(path, context),
            listing: OnceCell::new(),
            limits: OnceCell::new(),
        }
    }

    /// Whether this is the root of the filesystem
    pub fn is_root(&self) -> bool {
        self.path().parent().is_none()
    }

    fn entries(&self) -> Result<&Vec<Node>> {
        self.listing.get_or_try_init(|| {
            let nodes: Vec<Node> = DirScan::open(self)?.collect();
            tracing::debug!("Listed {} entries in {:?}", nodes.len(), self.path());
            Ok(nodes)
        })
    }

    /// Children that are not excluded
    ///
    /// The directory is read once. Without a sort key the cached order is
    /// returned (reversed on request), with one a sorted copy.
    pub fn listdir(&self, sort: Option<SortBy>, reverse: bool) -> Result<Vec<&Node>> {
        let mut nodes: Vec<&Node> = self.entries()?.iter().collect();
        match sort {
            Some(sort) => sort.sort(&mut nodes, reverse),
            None if reverse => nodes.reverse(),
            None => {}
        }
        Ok(nodes)
    }

    /// Whether no visible children exist, stopping at the first one found
    pub fn is_empty(&self) -> Result<bool> {
        match self.listing.get() {
            Some(entries) => Ok(entries.is_empty()),
            None => Ok(DirScan::open(self)?.next().is_none()),
        }
    }

    /// Newest modification time among the directory and its children
    pub fn content_mtime(&self) -> Result<Option<SystemTime>> {
        let children = self.entries()?.iter().filter_map(|n| n.mtime());
        Ok(self.mtime().into_iter().chain(children).max())
    }

    /// Whether `name` exists here, dangling symlinks included
    pub fn contains(&self, name: &str) -> bool {
        match fs::symlink_metadata(self.path().join(name)) {
            Ok(_) => true,
            Err(e) => e.kind() != io::ErrorKind::NotFound,
        }
    }

    /// Filename and path length limits of the volume
    pub fn pathconf(&self) -> FsLimits {
        *self.limits.get_or_init(|| {
            self.context()
                .fs_limits()
                .unwrap_or_else(|| FsLimits::query(self.path()))
        })
    }

    /// Free variant of `filename` inside this directory
    pub fn choose_filename(&self, filename: &str) -> Result<String> {
        filename::choose_filename(
            self.path(),
            filename,
            self.context().filename_attempts(),
            self.pathconf(),
            |name| self.contains(name),
        )
    }

    pub fn can_upload(&self) -> bool {
        match self.context().upload_base() {
            Some(base) => is_within(self.path(), base),
            None => false,
        }
    }

    pub fn can_download(&self) -> bool {
        self.context().downloadable()
    }

    fn sanitize(&self, name: &str) -> Result<String> {
        let context = self.context();
        let filename = secure_filename(name, context.target_os(), context.fs_encoding());
        if filename.is_empty() {
            return Err(FsError::InvalidFilename {
                path: self.path().to_path_buf(),
                filename: name.to_string(),
            });
        }
        Ok(filename)
    }

    fn check_upload(&self) -> Result<()> {
        if self.can_upload() {
            Ok(())
        } else {
            Err(FsError::PermissionDenied {
                path: self.path().to_path_buf(),
                operation: Operation::Upload,
            })
        }
    }

    /// Store `reader` under a sanitized, collision-free version of `name`
    ///
    /// Returns the filename actually used. A listing read before the upload
    /// is not refreshed.
    pub fn upload<R: Read>(&self, name: &str, reader: &mut R) -> Result<String> {
        self.check_upload()?;
        let filename = self.choose_filename(&self.sanitize(name)?)?;
        let target = self.path().join(&filename);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(FsError::AlreadyExists(target));
            }
            Err(e) => return Err(e.into()),
        };

        let written = io::copy(reader, &mut file)?;
        tracing::info!("Uploaded {:?} ({} bytes)", target, written);
        Ok(filename)
    }

    /// Create a subdirectory named after the sanitized `name`
    pub fn create_directory(&self, name: &str) -> Result<String> {
        self.check_upload()?;
        let dirname = self.sanitize(name)?;
        let target = self.path().join(&dirname);

        match fs::create_dir(&target) {
            Ok(()) => {
                tracing::info!("Created directory {:?}", target);
                Ok(dirname)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(FsError::AlreadyExists(target)),
            Err(e) => Err(e.into()),
        }
    }

    /// Archive of this directory, produced while it is consumed
    pub fn download(&self) -> Result<TarStream> {
        if !self.can_download() {
            return Err(FsError::PermissionDenied {
                path: self.path().to_path_buf(),
                operation: Operation::Download,
            });
        }

        let context = self.context();
        Ok(TarStream::new(
            self.path(),
            Arc::clone(context.exclude()),
            context.tar_options().clone(),
        ))
    }
}

impl FsNode for DirectoryNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn is_directory(&self) -> bool {
        true
    }

    fn mimetype(&self) -> &str {
        DIRECTORY_MIMETYPE
    }

    fn size(&self) -> Option<String> {
        None
    }

    fn can_remove(&self) -> bool {
        let under = match self.context().remove_base() {
            Some(base) => is_under(self.path(), base),
            None => false,
        };
        under && self.parent().is_some()
    }

    /// Remove the directory and everything inside it
    fn remove(&self) -> Result<()> {
        if !self.can_remove() {
            return Err(FsError::PermissionDenied {
                path: self.path().to_path_buf(),
                operation: Operation::Remove,
            });
        }
        fs::remove_dir_all(self.path())?;
        tracing::info!("Removed directory {:?}", self.path());
        Ok(())
    }
}

fn is_missing(e: &io::Error) -> bool {
    if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::InvalidInput) {
        return true;
    }
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::ENOTDIR) {
        return true;
    }
    false
}

/// A node of either kind
pub enum Node {
    File(FileNode),
    Directory(DirectoryNode),
}

impl Node {
    /// Build the node for an absolute path inside the base
    pub fn from_path(path: impl Into<PathBuf>, context: Arc<BrowseContext>) -> Result<Self> {
        let path = path.into();
        if !is_within(&path, context.base()) {
            return Err(FsError::BoundaryViolation {
                path,
                base: context.base().to_path_buf(),
            });
        }

        let is_dir = match fs::metadata(&path) {
            Ok(m) => m.is_dir(),
            // Dangling symlink
            Err(e) if e.kind() == io::ErrorKind::NotFound && fs::symlink_metadata(&path).is_ok() => false,
            // Missing, a file used as a directory, or a NUL byte in the name
            Err(e) if is_missing(&e) => {
                return Err(FsError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::new(path, context, is_dir))
    }

    fn new(path: PathBuf, context: Arc<BrowseContext>, is_dir: bool) -> Self {
        if is_dir {
            Node::Directory(DirectoryNode::new(path, context))
        } else {
            Node::File(FileNode::new(path, context))
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryNode> {
        match self {
            Node::Directory(dir) => Some(dir),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::File(file) => Some(file),
            Node::Directory(_) => None,
        }
    }

    pub fn into_directory(self) -> Option<DirectoryNode> {
        match self {
            Node::Directory(dir) => Some(dir),
            Node::File(_) => None,
        }
    }
}

impl FsNode for Node {
    fn base(&self) -> &NodeBase {
        match self {
            Node::File(file) => file.base(),
            Node::Directory(dir) => dir.base(),
        }
    }

    fn is_directory(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    fn mimetype(&self) -> &str {
        match self {
            Node::File(file) => file.mimetype(),
            Node::Directory(dir) => dir.mimetype(),
        }
    }

    fn size(&self) -> Option<String> {
        match self {
            Node::File(file) => file.size(),
            Node::Directory(dir) => dir.size(),
        }
    }

    fn can_remove(&self) -> bool {
        match self {
            Node::File(file) => file.can_remove(),
            Node::Directory(dir) => dir.can_remove(),
        }
    }

    fn remove(&self) -> Result<()> {
        match self {
            Node::File(file) => file.remove(),
            Node::Directory(dir) => dir.remove(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_directory() { "Directory" } else { "File" };
        f.debug_tuple(kind).field(&self.path()).finish()
    }
}

/// Single pass over a directory yielding the visible children
struct DirScan<'a> {
    dir: &'a DirectoryNode,
    entries: fs::ReadDir,
}

impl<'a> DirScan<'a> {
    fn open(dir: &'a DirectoryNode) -> Result<Self> {
        let entries = fs::read_dir(dir.path())?;
        Ok(Self { dir, entries })
    }

    fn child(&self, entry: &fs::DirEntry) -> io::Result<Option<Node>> {
        let context = self.dir.context();
        let path = entry.path();
        let file_type = entry.file_type()?;
        let is_symlink = file_type.is_symlink();

        if context.is_excluded(&path, is_symlink) {
            return Ok(None);
        }

        let is_dir = if is_symlink {
            // Classified by target, dangling links are files
            fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false)
        } else {
            file_type.is_dir()
        };

        let node = Node::new(path, Arc::clone(context), is_dir);
        let _ = node.base().is_symlink.set(is_symlink);

        // Windows hands out stat data with the directory entry
        #[cfg(windows)]
        if !is_symlink {
            if let Ok(stats) = entry.metadata() {
                let _ = node.base().stats.set(stats);
            }
        }

        Ok(Some(node))
    }
}

impl Iterator for DirScan<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        while let Some(entry) = self.entries.next() {
            let result = entry.and_then(|entry| self.child(&entry));
            match result {
                Ok(Some(node)) => return Some(node),
                Ok(None) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Skipping entry of {:?}: {}", self.dir.path(), e);
                }
            }
        }
        None
    }
}
