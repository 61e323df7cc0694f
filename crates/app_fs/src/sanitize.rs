//! Filename sanitization for untrusted names (uploads, new folders)

use crate::encoding;

/// Operating system whose filename rules are enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    /// Windows: control characters, `<>:"/\|?*` and device names are forbidden
    Windows,
    /// Everything else: only `/` and NUL are forbidden
    Posix,
}

impl TargetOs {
    /// Rules of the platform we are running on
    pub fn current() -> Self {
        if cfg!(windows) {
            TargetOs::Windows
        } else {
            TargetOs::Posix
        }
    }
}

/// Names never accepted, whatever the target
const RESERVED_NAMES: &[&str] = &[".", "..", "::", "/", "\\"];

/// Windows reserved device names
const DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL",
    "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9",
    "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Separators stripped from names regardless of the host OS
const COMMON_PATH_SEPARATORS: &[char] = &['\\', '/'];

const RESTRICTED_CHARS: &[char] = &['/', '\0'];

/// Windows forbidden characters (control characters are checked separately)
const NT_RESTRICTED_CHARS: &[char] = &['/', '\0', '\\', '<', '>', ':', '"', '|', '?', '*'];

/// Keep only the last component, splitting on every known separator
pub fn generic_filename(path: &str) -> &str {
    path.rsplit(COMMON_PATH_SEPARATORS).next().unwrap_or(path)
}

fn is_restricted(c: char, target: TargetOs) -> bool {
    match target {
        TargetOs::Windows => (c as u32) < 0x20 || NT_RESTRICTED_CHARS.contains(&c),
        TargetOs::Posix => RESTRICTED_CHARS.contains(&c),
    }
}

/// Replace every restricted character with an underscore
pub fn clean_restricted_chars(name: &str, target: TargetOs) -> String {
    name.chars()
        .map(|c| if is_restricted(c, target) { '_' } else { c })
        .collect()
}

/// Check if name is reserved on the target
pub fn is_forbidden_filename(name: &str, target: TargetOs) -> bool {
    if RESERVED_NAMES.contains(&name) {
        return true;
    }

    if target == TargetOs::Windows {
        let base_name = name.split('.').next().unwrap_or("");
        return DEVICE_NAMES.iter().any(|d| d.eq_ignore_ascii_case(base_name));
    }

    false
}

/// Turn an untrusted string into a filename safe to create
///
/// Only the last path segment survives. Returns an empty string when
/// nothing usable is left or the name is reserved.
pub fn secure_filename(path: &str, target: TargetOs, fs_encoding: &str) -> String {
    let name = generic_filename(path);
    let name = clean_restricted_chars(name, target);

    // Windows drops them silently, elsewhere they only confuse
    let name = name.trim_matches(|c| c == ' ' || c == '.');

    if name.is_empty() || is_forbidden_filename(name, target) {
        return String::new();
    }

    encoding::reencode_filename(name, fs_encoding)
}

/// Check if name would pass sanitization unchanged
pub fn is_valid_filename(name: &str, target: TargetOs, fs_encoding: &str) -> bool {
    !name.is_empty() && secure_filename(name, target, fs_encoding) == name
}
