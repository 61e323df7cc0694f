//! Human readable sizes

const BINARY_UNITS: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
const STANDARD_UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Scale a byte count down to a unit
///
/// The value is divided by 1024 (binary) or 1000 while it is at least 1000,
/// so 1023 bytes stay `(1023.0, "B")`.
pub fn fmt_size(size: u64, binary: bool) -> (f64, &'static str) {
    let (units, divider) = if binary {
        (&BINARY_UNITS, 1024.0)
    } else {
        (&STANDARD_UNITS, 1000.0)
    };

    let mut value = size as f64;
    for unit in &units[..units.len() - 1] {
        if value < 1000.0 {
            return (value, *unit);
        }
        value /= divider;
    }
    (value, units[units.len() - 1])
}

/// Format a byte count, `"512 B"` or `"1.50 KiB"`
pub fn human_size(size: u64, binary: bool) -> String {
    match fmt_size(size, binary) {
        (value, "B") => format!("{} B", value as u64),
        (value, unit) => format!("{:.2} {}", value, unit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_size_binary() {
        assert_eq!(fmt_size(0, true), (0.0, "B"));
        assert_eq!(fmt_size(999, true), (999.0, "B"));
        assert_eq!(fmt_size(1000, true), (1000.0 / 1024.0, "KiB"));
        assert_eq!(fmt_size(1024, true), (1.0, "KiB"));
        assert_eq!(fmt_size(1536, true), (1.5, "KiB"));
        assert_eq!(fmt_size(1024 * 1024, true), (1.0, "MiB"));
    }

    #[test]
    fn test_fmt_size_standard() {
        assert_eq!(fmt_size(999, false), (999.0, "B"));
        assert_eq!(fmt_size(1000, false), (1.0, "KB"));
        assert_eq!(fmt_size(2_500_000, false), (2.5, "MB"));
    }

    #[test]
    fn test_fmt_size_saturates_at_largest_unit() {
        let (value, unit) = fmt_size(u64::MAX, false);
        assert_eq!(unit, "EB");
        assert!(value > 18.0);
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512, true), "512 B");
        assert_eq!(human_size(1536, true), "1.50 KiB");
        assert_eq!(human_size(1_000_000, false), "1.00 MB");
    }
}
