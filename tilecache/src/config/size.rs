//! Cache budget sizes ("100MB", "2GB").

use thiserror::Error;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{0}' - expected a byte count or a value like '512KB', '100MB', '2GB'")]
pub struct SizeParseError(String);

/// Parse a size into bytes.
///
/// Accepts a bare byte count or an integer with a `K`/`KB`, `M`/`MB` or
/// `G`/`GB` suffix (binary multiples, case-insensitive, optional space).
///
/// # Examples
///
/// ```
/// use tilecache::config::parse_size;
///
/// assert_eq!(parse_size("4096").unwrap(), 4096);
/// assert_eq!(parse_size("100MB").unwrap(), 100 * 1024 * 1024);
/// assert_eq!(parse_size("2 g").unwrap(), 2 * 1024 * 1024 * 1024);
/// ```
pub fn parse_size(input: &str) -> Result<u64, SizeParseError> {
    let error = || SizeParseError(input.to_string());
    let upper = input.trim().to_ascii_uppercase();
    let unit_start = upper
        .find(|c: char| !c.is_ascii_digit() && !c.is_whitespace())
        .unwrap_or(upper.len());
    let (number, unit) = upper.split_at(unit_start);

    let multiplier = match unit {
        "" | "B" => 1,
        "K" | "KB" => KB,
        "M" | "MB" => MB,
        "G" | "GB" => GB,
        _ => return Err(error()),
    };
    let number = number.trim();
    if number.is_empty() || number.contains(char::is_whitespace) {
        return Err(error());
    }
    let value: u64 = number.parse().map_err(|_| error())?;
    value.checked_mul(multiplier).ok_or_else(error)
}

/// Format a byte count for display.
///
/// Exact multiples use the largest whole unit; other values above 1KB are
/// shown with one decimal.
///
/// ```
/// use tilecache::config::format_size;
///
/// assert_eq!(format_size(100 * 1024 * 1024), "100MB");
/// assert_eq!(format_size(1536), "1.5KB");
/// assert_eq!(format_size(999), "999B");
/// ```
pub fn format_size(bytes: u64) -> String {
    for (unit, name) in [(GB, "GB"), (MB, "MB"), (KB, "KB")] {
        if bytes >= unit {
            return if bytes % unit == 0 {
                format!("{}{}", bytes / unit, name)
            } else {
                format!("{:.1}{}", bytes as f64 / unit as f64, name)
            };
        }
    }
    format!("{}B", bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("12B").unwrap(), 12);
        assert_eq!(parse_size("1k").unwrap(), 1024);
        assert_eq!(parse_size("50MB").unwrap(), 50 * MB);
        assert_eq!(parse_size(" 100 mb ").unwrap(), 100 * MB);
        assert_eq!(parse_size("3G").unwrap(), 3 * GB);
    }

    #[test]
    fn test_parse_invalid() {
        for input in ["", "MB", "1.5GB", "-1", "10TB", "1 0MB", "12XB"] {
            assert!(parse_size(input).is_err(), "{input:?} should not parse");
        }
        assert!(parse_size("99999999999999GB").is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(KB), "1KB");
        assert_eq!(format_size(50 * MB), "50MB");
        assert_eq!(format_size(GB + GB / 2), "1.5GB");
    }

    #[test]
    fn test_parse_accepts_formatted_whole_units() {
        for bytes in [KB, 100 * MB, 2 * GB] {
            assert_eq!(parse_size(&format_size(bytes)).unwrap(), bytes);
        }
    }
}
