//! Sandbox containment checks and URL path translation
//!
//! Every path received from a URL is translated here before any other part
//! of the crate touches the filesystem. Comparisons are case-normalized on
//! Windows so case-insensitive volumes cannot be used to sidestep the base.

use crate::{FsError, Result};
use std::borrow::Cow;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

const SEP: u8 = MAIN_SEPARATOR as u8;

/// Byte view of a path used for comparisons
#[cfg(windows)]
fn normcase(path: &Path) -> Cow<'_, [u8]> {
    Cow::Owned(
        path.to_string_lossy()
            .replace('/', "\\")
            .to_lowercase()
            .into_bytes(),
    )
}

#[cfg(not(windows))]
fn normcase(path: &Path) -> Cow<'_, [u8]> {
    Cow::Borrowed(path.as_os_str().as_encoded_bytes())
}

fn strip_trailing_sep(bytes: &[u8]) -> &[u8] {
    match bytes.split_last() {
        Some((&SEP, rest)) => rest,
        _ => bytes,
    }
}

/// Check if both paths point to the same location (one trailing separator ignored)
pub fn paths_equal<P: AsRef<Path>, B: AsRef<Path>>(path: P, base: B) -> bool {
    let path = normcase(path.as_ref());
    let base = normcase(base.as_ref());
    strip_trailing_sep(&path) == strip_trailing_sep(&base)
}

fn has_parent_dir(path: &Path) -> bool {
    path.components().any(|c| c == Component::ParentDir)
}

/// Check if path is strictly below base
///
/// A path with `..` segments is never below anything: the OS resolves them
/// after the prefix test would have passed.
pub fn is_under<P: AsRef<Path>, B: AsRef<Path>>(path: P, base: B) -> bool {
    if has_parent_dir(path.as_ref()) {
        return false;
    }
    let path = normcase(path.as_ref());
    let base = normcase(base.as_ref());
    let path = strip_trailing_sep(&path);
    let base = strip_trailing_sep(&base);

    path.len() > base.len() && path.starts_with(base) && path[base.len()] == SEP
}

/// Check if path is base itself or lies below it
pub fn is_within<P: AsRef<Path>, B: AsRef<Path>>(path: P, base: B) -> bool {
    let (path, base) = (path.as_ref(), base.as_ref());
    paths_equal(path, base) || is_under(path, base)
}

/// Make an absolute path relative to base, using `/` as separator
///
/// The base itself maps to an empty string.
pub fn to_relative<P: AsRef<Path>, B: AsRef<Path>>(path: P, base: B) -> Result<String> {
    let (path, base) = (path.as_ref(), base.as_ref());

    if !is_within(path, base) {
        return Err(FsError::BoundaryViolation {
            path: path.to_path_buf(),
            base: base.to_path_buf(),
        });
    }

    let skip = base.components().count();
    let parts: Vec<_> = path
        .components()
        .skip(skip)
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();

    Ok(parts.join("/"))
}

#[cfg(windows)]
fn is_url_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

#[cfg(not(windows))]
fn is_url_separator(c: char) -> bool {
    c == '/'
}

/// Translate a URL path into an absolute path under base
///
/// The joined path is canonicalized (symlinks and `..` resolved by the OS
/// for the existing part) before the containment check, so neither dot
/// segments nor symlinks can leave the base unnoticed.
pub fn to_absolute<B: AsRef<Path>>(urlpath: &str, base: B) -> Result<PathBuf> {
    let base = canonicalize_lenient(base.as_ref())?;

    let mut joined = base.clone();
    for segment in urlpath.split(is_url_separator) {
        if !segment.is_empty() {
            joined.push(segment);
        }
    }

    let real = canonicalize_lenient(&joined)?;
    if is_within(&real, &base) {
        Ok(real)
    } else {
        tracing::warn!(urlpath, path = %real.display(), "Rejected path outside base directory");
        Err(FsError::BoundaryViolation { path: real, base })
    }
}

/// Canonicalize the deepest existing ancestor and append the rest lexically
pub fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        match fs::canonicalize(&existing) {
            Ok(real) => {
                let mut resolved = strip_verbatim(real);
                for part in tail.iter().rev() {
                    match part.to_str() {
                        Some("..") => {
                            resolved.pop();
                        }
                        Some(".") => {}
                        _ => resolved.push(part),
                    }
                }
                return Ok(resolved);
            }
            Err(e) => {
                match existing.components().next_back() {
                    Some(Component::Normal(name)) => tail.push(name.to_os_string()),
                    Some(Component::ParentDir) => tail.push(OsString::from("..")),
                    Some(Component::CurDir) => {}
                    _ => return Err(e),
                }
                if !existing.pop() {
                    return Err(e);
                }
            }
        }
    }
}

/// Resolve symlinks of path, tolerating dangling links
pub fn realpath(path: &Path) -> PathBuf {
    if let Ok(real) = fs::canonicalize(path) {
        return strip_verbatim(real);
    }

    let target = match fs::read_link(path) {
        Ok(target) => match path.parent() {
            Some(parent) => parent.join(target),
            None => target,
        },
        Err(_) => path.to_path_buf(),
    };

    canonicalize_lenient(&target).unwrap_or(target)
}

/// Remove the `\\?\` prefix `fs::canonicalize` adds on Windows
#[cfg(windows)]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    let display = path.to_string_lossy();
    match display.strip_prefix(r"\\?\") {
        Some(rest) if !rest.starts_with("UNC\\") => PathBuf::from(rest),
        _ => path,
    }
}

#[cfg(not(windows))]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    path
}
