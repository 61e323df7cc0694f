//! Application error types

use app_fs::{FsError, Operation};
use std::io;
use thiserror::Error;

/// Main application error type
///
/// Filesystem errors are folded into a few caller-facing classes. Paths
/// outside the sandbox and refused removals are reported as missing, so a
/// caller cannot probe what exists beyond what it may see.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Equivalent HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::Forbidden(_) => 403,
            AppError::BadRequest(_) => 400,
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => 500,
        }
    }

    /// Process exit code for the command line front end
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::NotFound(_) => 3,
            AppError::Forbidden(_) => 4,
            AppError::BadRequest(_) => 2,
            AppError::Config(_) => 78,
            AppError::Io(_) | AppError::Internal(_) => 1,
        }
    }

    /// Get a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotFound(path) => format!("No such file or directory: {}", path),
            AppError::Forbidden(msg) => format!("Not allowed: {}", msg),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                "Permission denied by the operating system".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<FsError> for AppError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(path) => AppError::NotFound(path),
            FsError::BoundaryViolation { path, .. } => {
                tracing::warn!("Boundary violation reported as not found: {:?}", path);
                AppError::NotFound("requested path".to_string())
            }
            FsError::PermissionDenied {
                path,
                operation: Operation::Remove,
            } => {
                tracing::warn!("Removal refused, reported as not found: {:?}", path);
                AppError::NotFound("requested path".to_string())
            }
            FsError::PermissionDenied { operation, .. } => {
                AppError::Forbidden(format!("{} is disabled here", operation))
            }
            FsError::InvalidFilename { filename, .. } => {
                AppError::BadRequest(format!("Invalid filename: {:?}", filename))
            }
            FsError::FilenameTooLong { filename, limit, .. } => AppError::BadRequest(format!(
                "Filename {:?} is too long ({} bytes at most)",
                filename, limit
            )),
            FsError::PathTooLong { limit, .. } => {
                AppError::BadRequest(format!("Path is too long ({} bytes at most)", limit))
            }
            FsError::AlreadyExists(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                AppError::BadRequest(format!("{:?} already exists", name))
            }
            FsError::InvalidPath(msg) => AppError::BadRequest(msg),
            FsError::InvalidPattern(msg) => AppError::Config(msg),
            FsError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => AppError::NotFound("requested path".to_string()),
                io::ErrorKind::PermissionDenied => AppError::Io(e),
                _ => {
                    // Messages may carry absolute paths
                    tracing::error!("Filesystem error: {}", e);
                    AppError::Internal("filesystem operation failed".to_string())
                }
            },
        }
    }
}
