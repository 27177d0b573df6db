pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;

/// Parses a byte count such as `4096`, `"64MiB"`, `"4k"` or `"1.5G"`.
///
/// Suffixes are binary (`k`/`kb`/`kib` = 1024) and case-insensitive.
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty byte size".to_owned());
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid byte size number in {trimmed:?}"))?;

    let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KB,
        "m" | "mb" | "mib" => MB,
        "g" | "gb" | "gib" => GB,
        "t" | "tb" | "tib" => GB * 1024,
        other => return Err(format!("unknown byte size suffix {other:?}")),
    };

    let bytes = number * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(format!("byte size out of range: {trimmed:?}"));
    }
    Ok(bytes.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_sizes() {
        assert_eq!(parse_byte_size("4096"), Ok(4096));
        assert_eq!(parse_byte_size("4k"), Ok(4 * KB));
        assert_eq!(parse_byte_size("64MiB"), Ok(64 * MB));
        assert_eq!(parse_byte_size(" 2 GB "), Ok(2 * GB));
        assert_eq!(parse_byte_size("1.5m"), Ok(MB + MB / 2));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("lots").is_err());
        assert!(parse_byte_size("12 parsecs").is_err());
    }
}
