//! Filesystem filename encoding
//!
//! Names are pushed through the filesystem encoding before they are used,
//! so characters the volume cannot store never reach a syscall.

use encoding_rs::Encoding;

/// Labels meaning strict 7-bit ASCII (WHATWG maps "ascii" to windows-1252)
const ASCII_LABELS: &[&str] = &["ascii", "us-ascii", "ansi_x3.4-1968", "646"];

enum Target {
    Ascii,
    Encoding(&'static Encoding),
}

impl Target {
    fn for_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        if ASCII_LABELS.contains(&label.as_str()) {
            return Target::Ascii;
        }

        match Encoding::for_label(label.as_bytes()) {
            Some(encoding) => Target::Encoding(encoding),
            None => {
                tracing::warn!("Unknown filesystem encoding {}, falling back to ASCII", label);
                Target::Ascii
            }
        }
    }

    fn can_encode(&self, c: char) -> bool {
        match self {
            Target::Ascii => c.is_ascii(),
            Target::Encoding(encoding) => {
                let mut buf = [0u8; 4];
                let (_, _, had_errors) = encoding.encode(c.encode_utf8(&mut buf));
                !had_errors
            }
        }
    }
}

/// Re-encode a filename, replacing unmappable characters
///
/// Each unmappable character becomes `_` plus a running counter (`_1`,
/// `_2`, ...) so distinct names do not collapse into the same one.
pub fn reencode_filename(name: &str, label: &str) -> String {
    let target = Target::for_label(label);

    if let Target::Encoding(encoding) = &target {
        if *encoding == encoding_rs::UTF_8 {
            return name.to_string();
        }
    }

    let mut result = String::with_capacity(name.len());
    let mut replaced = 0;

    for c in name.chars() {
        if target.can_encode(c) {
            result.push(c);
        } else {
            replaced += 1;
            result.push('_');
            result.push_str(&replaced.to_string());
        }
    }

    if replaced > 0 {
        tracing::debug!("Replaced {} unmappable characters in {:?}", replaced, name);
    }

    result
}

/// Extract the charset part of a locale string ("en_US.UTF-8" -> "UTF-8")
pub fn fs_encoding_from_locale(locale: &str) -> Option<&str> {
    let (_, charset) = locale.split_once('.')?;
    let charset = charset.split('@').next().unwrap_or(charset);
    if charset.is_empty() {
        None
    } else {
        Some(charset)
    }
}

/// Get the filesystem encoding label for this process
#[cfg(windows)]
pub fn system_fs_encoding() -> String {
    // Wide-char APIs: every Unicode name is representable
    "utf-8".to_string()
}

#[cfg(not(windows))]
pub fn system_fs_encoding() -> String {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
        .and_then(|locale| fs_encoding_from_locale(&locale).map(str::to_string))
        .unwrap_or_else(|| "utf-8".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passthrough() {
        assert_eq!(reencode_filename("Hello, 世界!", "utf-8"), "Hello, 世界!");
        assert_eq!(reencode_filename("Hello, 世界!", "UTF8"), "Hello, 世界!");
    }

    #[test]
    fn test_ascii_counter() {
        assert_eq!(reencode_filename("ñandú", "ascii"), "_1and_2");
        assert_eq!(reencode_filename("plain.txt", "us-ascii"), "plain.txt");
    }

    #[test]
    fn test_legacy_encoding() {
        // "テスト" is representable in Shift_JIS, the emoji is not
        assert_eq!(reencode_filename("テスト😀", "shift_jis"), "テスト_1");
        assert_eq!(reencode_filename("café", "latin1"), "café");
    }

    #[test]
    fn test_unknown_label_falls_back_to_ascii() {
        assert_eq!(reencode_filename("é", "no-such-encoding"), "_1");
    }

    #[test]
    fn test_locale_parsing() {
        assert_eq!(fs_encoding_from_locale("en_US.UTF-8"), Some("UTF-8"));
        assert_eq!(fs_encoding_from_locale("de_DE.ISO-8859-15@euro"), Some("ISO-8859-15"));
        assert_eq!(fs_encoding_from_locale("C"), None);
    }
}
