//! Path exclusion
//!
//! Excluded paths are hidden from listings, refused on access and left out
//! of archives. Symlinks are additionally checked through their target so a
//! link cannot expose something outside the base or something excluded.

use crate::guard::{is_within, realpath};
use crate::{FsError, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};
use std::sync::Arc;

/// Predicate deciding whether a path is hidden
pub trait ExcludeFilter: Send + Sync {
    fn is_excluded(&self, path: &Path, follow_symlinks: bool) -> bool;
}

impl<F> ExcludeFilter for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_excluded(&self, path: &Path, _follow_symlinks: bool) -> bool {
        self(path)
    }
}

/// Exclusion by glob patterns, gitignore flavoured
///
/// - `/name` only matches directly below the base, `name` at any depth
/// - `*` and `?` never cross a separator, `**` does
/// - `[abc]` and `[!abc]` classes
/// - a matching directory excludes everything below it
#[derive(Debug, Clone)]
pub struct GlobExclude {
    regex: Option<Regex>,
}

impl GlobExclude {
    pub fn new<S: AsRef<str>>(patterns: &[S], base: &Path) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self { regex: None });
        }

        let sep = regex::escape(MAIN_SEPARATOR_STR);
        let base = base.to_string_lossy();
        let base = regex::escape(base.trim_end_matches(MAIN_SEPARATOR_STR));

        let alternatives: Vec<String> = patterns
            .iter()
            .map(|p| translate(p.as_ref(), &base, &sep))
            .collect();

        let case = if cfg!(windows) { "(?i)" } else { "" };
        let source = format!("{}(?:{})", case, alternatives.join("|"));

        let regex = Regex::new(&source).map_err(|e| FsError::InvalidPattern(e.to_string()))?;
        tracing::debug!("Exclude regex: {}", regex.as_str());

        Ok(Self { regex: Some(regex) })
    }

    /// Check a path against the patterns, ignoring symlinks
    pub fn matches(&self, path: &Path) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(&path.to_string_lossy()),
            None => false,
        }
    }
}

impl ExcludeFilter for GlobExclude {
    fn is_excluded(&self, path: &Path, _follow_symlinks: bool) -> bool {
        self.matches(path)
    }
}

/// Translate one glob pattern into an anchored regex alternative
fn translate(pattern: &str, base: &str, sep: &str) -> String {
    let pattern = pattern.trim_end_matches('/');
    let (anchored, pattern) = match pattern.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };

    let mut out = format!("^{}{}", base, sep);
    if !anchored {
        out.push_str(&format!("(?:.*{})?", sep));
    }

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push_str(".*");
                i += 1;
            }
            '*' => out.push_str(&format!("[^{}]*", sep)),
            '?' => out.push_str(&format!("[^{}]", sep)),
            '/' => out.push_str(sep),
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(len) if len > 0 => {
                    let class = &chars[i + 1..i + 1 + len];
                    out.push('[');
                    for (n, &c) in class.iter().enumerate() {
                        match c {
                            '!' if n == 0 => out.push('^'),
                            // set operators inside regex classes
                            '\\' | '[' | '&' | '~' => {
                                out.push('\\');
                                out.push(c);
                            }
                            _ => out.push(c),
                        }
                    }
                    out.push(']');
                    i += len + 1;
                }
                _ => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
        i += 1;
    }

    out.push_str(&format!("(?:{}.*)?$", sep));
    out
}

/// Read glob patterns from files, one per line, `#` starts a comment
pub fn collect_exclude_patterns<P: AsRef<Path>>(files: &[P]) -> Result<Vec<String>> {
    let mut patterns = Vec::new();
    for file in files {
        let content = fs::read_to_string(file.as_ref())?;
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if !line.is_empty() {
                patterns.push(line.to_string());
            }
        }
    }
    Ok(patterns)
}

/// Exclusion policy of a browsing context
///
/// A path is excluded when any filter matches it. With `follow_symlinks`,
/// a symlink is also excluded when its target lies outside the base or is
/// excluded itself.
#[derive(Clone)]
pub struct ExclusionRules {
    base: PathBuf,
    filters: Vec<Arc<dyn ExcludeFilter>>,
}

impl ExclusionRules {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            filters: Vec::new(),
        }
    }

    /// Register an additional filter
    pub fn add<F: ExcludeFilter + 'static>(&mut self, filter: F) {
        self.filters.push(Arc::new(filter));
    }

    pub fn with<F: ExcludeFilter + 'static>(mut self, filter: F) -> Self {
        self.add(filter);
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl ExcludeFilter for ExclusionRules {
    fn is_excluded(&self, path: &Path, follow_symlinks: bool) -> bool {
        if self.filters.iter().any(|f| f.is_excluded(path, false)) {
            return true;
        }

        if follow_symlinks {
            let real = realpath(path);
            if real.as_path() != path {
                return !is_within(&real, &self.base) || self.is_excluded(&real, false);
            }
        }

        false
    }
}

impl std::fmt::Debug for ExclusionRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusionRules")
            .field("base", &self.base)
            .field("filters", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base() -> PathBuf {
        PathBuf::from(MAIN_SEPARATOR_STR).join("srv").join("data")
    }

    fn path(rel: &str) -> PathBuf {
        rel.split('/').fold(base(), |p, s| p.join(s))
    }

    #[test]
    fn test_glob_any_depth() {
        let glob = GlobExclude::new(&["*.tmp"], &base()).unwrap();
        assert!(glob.matches(&path("a.tmp")));
        assert!(glob.matches(&path("deep/dir/b.tmp")));
        assert!(!glob.matches(&path("a.tmp.txt")));
        assert!(!glob.matches(&base()));
    }

    #[test]
    fn test_glob_anchored() {
        let glob = GlobExclude::new(&["/private"], &base()).unwrap();
        assert!(glob.matches(&path("private")));
        assert!(glob.matches(&path("private/inner/file")));
        assert!(!glob.matches(&path("public/private")));
        assert!(!glob.matches(&path("private2")));
    }

    #[test]
    fn test_glob_wildcards() {
        let glob = GlobExclude::new(&["/a/*/c", "/x/**/z", "file?.log"], &base()).unwrap();
        assert!(glob.matches(&path("a/b/c")));
        assert!(!glob.matches(&path("a/b/b/c")));
        assert!(glob.matches(&path("x/1/2/3/z")));
        assert!(glob.matches(&path("logs/file1.log")));
        assert!(!glob.matches(&path("logs/file10.log")));
    }

    #[test]
    fn test_glob_classes() {
        let glob = GlobExclude::new(&["[ab].txt", "[!0-9]x"], &base()).unwrap();
        assert!(glob.matches(&path("a.txt")));
        assert!(!glob.matches(&path("c.txt")));
        assert!(glob.matches(&path("kx")));
        assert!(!glob.matches(&path("5x")));
    }

    #[test]
    fn test_glob_literal_characters() {
        let glob = GlobExclude::new(&["notes (1).txt", "["], &base()).unwrap();
        assert!(glob.matches(&path("notes (1).txt")));
        assert!(!glob.matches(&path("notes 1.txt")));
        assert!(glob.matches(&path("[")));
    }

    #[test]
    fn test_no_patterns_matches_nothing() {
        let glob = GlobExclude::new::<&str>(&[], &base()).unwrap();
        assert!(!glob.matches(&path("anything")));
    }

    #[test]
    fn test_collect_patterns() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("ignore");
        fs::write(&file, "# comment\n*.tmp\n\n  /private  # trailing\n").unwrap();

        let patterns = collect_exclude_patterns(&[&file]).unwrap();
        assert_eq!(patterns, vec!["*.tmp".to_string(), "/private".to_string()]);
    }

    #[test]
    fn test_rules_closure_filter() {
        let rules = ExclusionRules::new(base()).with(|p: &Path| p.ends_with("hidden"));
        assert!(rules.is_excluded(&path("hidden"), true));
        assert!(!rules.is_excluded(&path("shown"), true));
    }

    #[cfg(unix)]
    #[test]
    fn test_rules_symlink_outside_base() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let base = fs::canonicalize(dir.path()).unwrap();
        std::os::unix::fs::symlink(outside.path(), base.join("escape")).unwrap();

        let rules = ExclusionRules::new(&base);
        assert!(rules.is_excluded(&base.join("escape"), true));
        assert!(!rules.is_excluded(&base.join("escape"), false));
    }

    #[cfg(unix)]
    #[test]
    fn test_rules_symlink_to_excluded_target() {
        let dir = TempDir::new().unwrap();
        let base = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir(base.join("private")).unwrap();
        fs::create_dir(base.join("public")).unwrap();
        std::os::unix::fs::symlink(base.join("private"), base.join("link")).unwrap();
        std::os::unix::fs::symlink(base.join("public"), base.join("ok")).unwrap();

        let glob = GlobExclude::new(&["/private"], &base).unwrap();
        let rules = ExclusionRules::new(&base).with(glob);
        assert!(rules.is_excluded(&base.join("link"), true));
        assert!(!rules.is_excluded(&base.join("ok"), true));
        assert!(!rules.is_excluded(&base.join("public"), true));
    }
}
