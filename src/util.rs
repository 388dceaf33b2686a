use crate::error::SfsError;

/// Parse a human-readable size string into bytes.
///
/// Accepts formats like `"8M"`, `"64K"`, `"1G"`, `"65536"`.
/// Uses binary units (1M = 1024² bytes).
pub fn parse_size(s: &str) -> Result<u64, SfsError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(SfsError::InvalidSize {
            message: "size cannot be empty".into(),
        });
    }

    // Split into numeric part and suffix
    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (&s[..i], s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str.parse().map_err(|_| SfsError::InvalidSize {
        message: format!("invalid size number: '{num_str}'"),
    })?;

    let multiplier: u64 = match suffix.as_str() {
        "" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        _ => {
            return Err(SfsError::InvalidSize {
                message: format!("unknown size suffix: '{suffix}' (use K, M, or G)"),
            });
        }
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| SfsError::InvalidSize {
            message: format!("size overflows: '{s}'"),
        })
}
