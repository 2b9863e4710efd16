//! Human-readable resource quantity parsing.

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Parse a memory quantity such as `"512m"`, `"1g"`, `"64k"` or `"1048576"` into bytes.
///
/// Suffixes are case-insensitive and binary (`k` = 1024). Returns a message describing
/// the problem when the string is empty, has an unknown suffix, or overflows `u64`.
pub fn parse_memory(input: &str) -> Result<u64, String> {
    let trimmed = input.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return Err("empty memory quantity".into());
    }

    let (digits, multiplier) = match trimmed.as_bytes()[trimmed.len() - 1] {
        b'k' => (&trimmed[..trimmed.len() - 1], KIB),
        b'm' => (&trimmed[..trimmed.len() - 1], MIB),
        b'g' => (&trimmed[..trimmed.len() - 1], GIB),
        b'0'..=b'9' => (trimmed.as_str(), 1),
        _ => return Err(format!("unknown unit in memory quantity `{input}`")),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid memory quantity `{input}`"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("memory quantity `{input}` overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_memory("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_memory("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory("4096").unwrap(), 4096);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_memory("").is_err());
        assert!(parse_memory("12x").is_err());
        assert!(parse_memory("m").is_err());
        assert!(parse_memory("-5m").is_err());
        assert!(parse_memory("99999999999999999999g").is_err());
    }
}
