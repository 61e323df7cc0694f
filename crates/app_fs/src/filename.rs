//! Collision-free filename selection

use crate::{FsError, Result};
use rand::Rng;
use std::path::Path;

/// Numbered candidates tried before falling back to random ones
pub const DEFAULT_FILENAME_ATTEMPTS: u32 = 999;

const RANDOM_SUFFIX_LEN: usize = 8;
const RANDOM_SUFFIX_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Filename and path length limits of a volume, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsLimits {
    pub name_max: usize,
    pub path_max: usize,
}

impl Default for FsLimits {
    #[cfg(windows)]
    fn default() -> Self {
        Self { name_max: 255, path_max: 32767 }
    }

    #[cfg(not(windows))]
    fn default() -> Self {
        Self { name_max: 255, path_max: 4096 }
    }
}

impl FsLimits {
    /// Ask the filesystem holding `path` for its limits
    #[cfg(unix)]
    pub fn query(path: &Path) -> Self {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let defaults = Self::default();
        let c_path = match CString::new(path.as_os_str().as_bytes()) {
            Ok(p) => p,
            Err(_) => return defaults,
        };

        let query = |name: libc::c_int, fallback: usize| {
            // SAFETY: c_path is a valid NUL-terminated string for the whole call
            let value = unsafe { libc::pathconf(c_path.as_ptr(), name) };
            if value > 0 {
                value as usize
            } else {
                fallback
            }
        };

        let limits = Self {
            name_max: query(libc::_PC_NAME_MAX, defaults.name_max),
            path_max: query(libc::_PC_PATH_MAX, defaults.path_max),
        };
        tracing::debug!("pathconf {:?}: {:?}", path, limits);
        limits
    }

    #[cfg(not(unix))]
    pub fn query(_path: &Path) -> Self {
        Self::default()
    }
}

/// Build an alternative for `filename`
///
/// With an attempt number the result is `"stem (n).ext"`, otherwise a
/// random 8 character tag is inserted instead. Up to two extensions are
/// kept together, so `backup.tar.gz` becomes `backup (2).tar.gz`.
pub fn alternative_filename(filename: &str, attempt: Option<u32>) -> String {
    let mut parts: Vec<&str> = filename.rsplitn(3, '.').collect();
    parts.reverse();

    let stem = parts[0];
    let ext: String = parts[1..].iter().map(|e| format!(".{}", e)).collect();

    let extra = match attempt {
        Some(n) => format!(" ({})", n),
        None => {
            let mut rng = rand::thread_rng();
            let tag: String = (0..RANDOM_SUFFIX_LEN)
                .map(|_| RANDOM_SUFFIX_CHARS[rng.gen_range(0..RANDOM_SUFFIX_CHARS.len())] as char)
                .collect();
            format!(" {}", tag)
        }
    };

    format!("{}{}{}", stem, extra, ext)
}

/// Pick a name for `filename` inside `directory` that `contains` reports free
///
/// Numbered alternatives are tried up to `attempts`, random ones after
/// that. The desired name is always checked against the volume limits,
/// even when a shorter alternative was free.
pub fn choose_filename<F>(
    directory: &Path,
    filename: &str,
    attempts: u32,
    limits: FsLimits,
    contains: F,
) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    let mut candidate = filename.to_string();
    let mut attempt = 2;

    while contains(&candidate) {
        candidate = if attempt <= attempts {
            let numbered = alternative_filename(filename, Some(attempt));
            attempt += 1;
            numbered
        } else {
            alternative_filename(filename, None)
        };
    }

    if filename.len() > limits.name_max {
        return Err(FsError::FilenameTooLong {
            path: directory.to_path_buf(),
            filename: filename.to_string(),
            limit: limits.name_max,
        });
    }

    let joined = directory.join(filename);
    if joined.as_os_str().len() > limits.path_max {
        return Err(FsError::PathTooLong {
            path: joined,
            limit: limits.path_max,
        });
    }

    if candidate != filename {
        tracing::debug!("{:?} taken in {:?}, using {:?}", filename, directory, candidate);
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn taken(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_alternative_numbered() {
        assert_eq!(alternative_filename("report.pdf", Some(2)), "report (2).pdf");
        assert_eq!(alternative_filename("backup.tar.gz", Some(3)), "backup (3).tar.gz");
        assert_eq!(alternative_filename("a.b.c.d", Some(2)), "a.b (2).c.d");
        assert_eq!(alternative_filename("README", Some(5)), "README (5)");
    }

    #[test]
    fn test_alternative_random() {
        let name = alternative_filename("photo.jpg", None);
        assert!(name.starts_with("photo "));
        assert!(name.ends_with(".jpg"));

        let tag = &name["photo ".len()..name.len() - ".jpg".len()];
        assert_eq!(tag.len(), 8);
        assert!(tag.bytes().all(|b| RANDOM_SUFFIX_CHARS.contains(&b)));
    }

    #[test]
    fn test_free_name_kept() {
        let existing = taken(&["other.txt"]);
        let name = choose_filename(
            Path::new("/srv"),
            "notes.txt",
            DEFAULT_FILENAME_ATTEMPTS,
            FsLimits::default(),
            |n| existing.contains(n),
        )
        .unwrap();
        assert_eq!(name, "notes.txt");
    }

    #[test]
    fn test_numbered_collision() {
        let existing = taken(&["notes.txt", "notes (2).txt"]);
        let name = choose_filename(
            Path::new("/srv"),
            "notes.txt",
            DEFAULT_FILENAME_ATTEMPTS,
            FsLimits::default(),
            |n| existing.contains(n),
        )
        .unwrap();
        assert_eq!(name, "notes (3).txt");
    }

    #[test]
    fn test_random_after_attempts_exhausted() {
        let existing = taken(&["a.txt", "a (2).txt", "a (3).txt"]);
        let name = choose_filename(Path::new("/srv"), "a.txt", 3, FsLimits::default(), |n| {
            existing.contains(n)
        })
        .unwrap();
        assert!(!existing.contains(&name));
        assert!(name.starts_with("a "));
        assert!(name.ends_with(".txt"));
    }

    #[test]
    fn test_name_too_long_even_when_free() {
        let limits = FsLimits { name_max: 8, path_max: 4096 };
        let result = choose_filename(Path::new("/srv"), "long-name.txt", 999, limits, |_| false);
        match result {
            Err(FsError::FilenameTooLong { filename, limit, .. }) => {
                assert_eq!(filename, "long-name.txt");
                assert_eq!(limit, 8);
            }
            other => panic!("expected FilenameTooLong, got {:?}", other),
        }
    }

    #[test]
    fn test_path_too_long() {
        let limits = FsLimits { name_max: 255, path_max: 12 };
        let result = choose_filename(Path::new("/srv/data"), "file.txt", 999, limits, |_| false);
        assert!(matches!(result, Err(FsError::PathTooLong { limit: 12, .. })));
    }

    #[test]
    fn test_length_measured_in_bytes() {
        // 5 characters, 11 bytes
        let name = "日本語xy";
        assert_eq!(name.chars().count(), 5);
        assert_eq!(name.len(), 11);

        let limits = FsLimits { name_max: 10, path_max: 4096 };
        let result = choose_filename(Path::new("/srv"), name, 999, limits, |_| false);
        assert!(matches!(result, Err(FsError::FilenameTooLong { limit: 10, .. })));

        let limits = FsLimits { name_max: 11, path_max: 4096 };
        let result = choose_filename(Path::new("/srv"), name, 999, limits, |_| false);
        assert_eq!(result.unwrap(), name);
    }

    #[cfg(unix)]
    #[test]
    fn test_query_limits() {
        let limits = FsLimits::query(Path::new("/"));
        assert!(limits.name_max > 0);
        assert!(limits.path_max >= limits.name_max);
    }
}
