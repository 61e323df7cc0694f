//! Mimetype detection
//!
//! Detection is pluggable: callers register detectors which are consulted
//! newest first before the built-in extension table.

use std::path::Path;
use std::sync::Arc;

/// Mimetype used when nothing else matches
pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Mimetype reported for every directory
pub const DIRECTORY_MIMETYPE: &str = "inode/directory";

/// Strategy turning a path into a mimetype
pub trait MimetypeDetector: Send + Sync {
    fn detect(&self, path: &Path) -> Option<String>;
}

impl<F> MimetypeDetector for F
where
    F: Fn(&Path) -> Option<String> + Send + Sync,
{
    fn detect(&self, path: &Path) -> Option<String> {
        self(path)
    }
}

/// Look up a mimetype from the file extension
pub fn by_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();

    let mimetype = match ext.as_str() {
        // Text
        "txt" | "text" | "log" | "conf" | "ini" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" | "mjs" => "text/javascript",
        "xml" => "text/xml",
        "py" => "text/x-python",
        "rs" => "text/x-rust",
        "sh" => "application/x-sh",
        "json" => "application/json",
        "toml" => "application/toml",
        "yaml" | "yml" => "application/yaml",

        // Images
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "ico" => "image/vnd.microsoft.icon",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",

        // Audio and video
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "wav" => "audio/x-wav",
        "m4a" => "audio/mp4",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "m3u" => "audio/x-mpegurl",
        "pls" => "audio/x-scpls",

        // Documents and archives
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" | "tgz" => "application/gzip",
        "bz2" => "application/x-bzip2",
        "xz" => "application/x-xz",
        "7z" => "application/x-7z-compressed",
        "rar" => "application/vnd.rar",

        _ => return None,
    };

    Some(mimetype)
}

/// Ordered chain of mimetype detectors
#[derive(Clone, Default)]
pub struct MimetypeRegistry {
    detectors: Vec<Arc<dyn MimetypeDetector>>,
}

impl MimetypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detector, it takes precedence over those registered before
    pub fn register<D: MimetypeDetector + 'static>(&mut self, detector: D) {
        self.detectors.insert(0, Arc::new(detector));
    }
}

impl MimetypeDetector for MimetypeRegistry {
    fn detect(&self, path: &Path) -> Option<String> {
        self.detectors
            .iter()
            .find_map(|d| d.detect(path))
            .or_else(|| by_extension(path).map(str::to_string))
            .or_else(|| Some(DEFAULT_MIMETYPE.to_string()))
    }
}

impl std::fmt::Debug for MimetypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MimetypeRegistry")
            .field("detectors", &self.detectors.len())
            .finish()
    }
}
