//! Input validation primitives for collected configuration values.
//!
//! Each parser returns the normalized string stored in the context, or a
//! human-readable problem used both for re-prompting and for
//! `config.invalid_value` errors.

pub fn parse_port(value: &str) -> std::result::Result<String, String> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("'{}' is not a port between 1 and 65535", value)),
        Ok(port) => Ok(port.to_string()),
    }
}

/// A fraction in (0, 1], kept as typed.
pub fn parse_fraction(value: &str) -> std::result::Result<String, String> {
    match value.trim().parse::<f64>() {
        Ok(f) if f > 0.0 && f <= 1.0 => Ok(value.trim().to_string()),
        _ => Err(format!("'{}' is not a fraction in (0, 1]", value)),
    }
}

pub fn parse_positive_int(value: &str) -> std::result::Result<String, String> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n.to_string()),
        _ => Err(format!("'{}' is not a positive integer", value)),
    }
}

/// A single token without whitespace (host names, dtype names).
pub fn parse_word(value: &str) -> std::result::Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        Err(format!("'{}' must be a single word", value))
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_bounds() {
        assert_eq!(parse_port("8000").unwrap(), "8000");
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_port("http").is_err());
    }

    #[test]
    fn fraction_bounds() {
        assert_eq!(parse_fraction(" 0.925 ").unwrap(), "0.925");
        assert_eq!(parse_fraction("1").unwrap(), "1");
        assert!(parse_fraction("0").is_err());
        assert!(parse_fraction("1.5").is_err());
        assert!(parse_fraction("-0.2").is_err());
    }

    #[test]
    fn positive_int() {
        assert_eq!(parse_positive_int("2").unwrap(), "2");
        assert!(parse_positive_int("0").is_err());
        assert!(parse_positive_int("-1").is_err());
    }

    #[test]
    fn word_rejects_whitespace() {
        assert_eq!(parse_word(" bfloat16 ").unwrap(), "bfloat16");
        assert!(parse_word("float 16").is_err());
        assert!(parse_word("").is_err());
    }
}
