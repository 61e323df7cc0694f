//! browsefs File System Layer
//!
//! Everything that turns an untrusted URL path into filesystem access goes
//! through this crate:
//! - guard: sandbox containment and URL/path translation
//! - sanitize / filename: safe upload names and collision resolution
//! - node: lazily cached file and directory nodes
//! - browser: listing order
//! - archive: streamed tarballs of directory trees

mod archive;
mod browser;
mod context;
mod encoding;
mod exclude;
mod filename;
mod format;
mod guard;
mod mimetype;
mod node;
mod sanitize;

pub use archive::{TarCompression, TarOptions, TarStream, TAR_MIMETYPE};
pub use browser::SortBy;
pub use context::BrowseContext;
pub use encoding::{fs_encoding_from_locale, reencode_filename, system_fs_encoding};
pub use exclude::{collect_exclude_patterns, ExcludeFilter, ExclusionRules, GlobExclude};
pub use filename::{alternative_filename, choose_filename, FsLimits, DEFAULT_FILENAME_ATTEMPTS};
pub use format::{fmt_size, human_size};
pub use guard::{canonicalize_lenient, is_under, is_within, paths_equal, realpath, to_absolute, to_relative};
pub use mimetype::{by_extension, MimetypeDetector, MimetypeRegistry, DEFAULT_MIMETYPE, DIRECTORY_MIMETYPE};
pub use node::{DirectoryNode, FileNode, FsNode, Node};
pub use sanitize::{
    clean_restricted_chars, generic_filename, is_forbidden_filename, is_valid_filename,
    secure_filename, TargetOs,
};

use std::path::PathBuf;
use thiserror::Error;

/// Operation refused by a base-directory permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Remove,
    Upload,
    Download,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Remove => f.write_str("remove"),
            Operation::Upload => f.write_str("upload"),
            Operation::Download => f.write_str("download"),
        }
    }
}

/// File system errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("{path:?} is outside of base directory {base:?}")]
    BoundaryViolation { path: PathBuf, base: PathBuf },

    #[error("Permission denied: cannot {operation} {path:?}")]
    PermissionDenied { path: PathBuf, operation: Operation },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid filename {filename:?} in {path:?}")]
    InvalidFilename { path: PathBuf, filename: String },

    #[error("Filename {filename:?} in {path:?} exceeds the filesystem limit of {limit} bytes")]
    FilenameTooLong {
        path: PathBuf,
        filename: String,
        limit: usize,
    },

    #[error("Path {path:?} exceeds the filesystem limit of {limit} bytes")]
    PathTooLong { path: PathBuf, limit: usize },

    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(String),

    #[error("Already exists: {0:?}")]
    AlreadyExists(PathBuf),
}

pub type Result<T> = std::result::Result<T, FsError>;
