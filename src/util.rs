use crate::error::QuickVmError;

/// Parse a size such as `"1G"`, `"32GB"`, `"512Mb"` or `"1073741824"` into
/// bytes. Units are binary (1G = 1024³) and case-insensitive.
pub fn parse_size(s: &str) -> Result<u64, QuickVmError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(QuickVmError::Validation {
            message: "size cannot be empty".into(),
        });
    }

    let (digits, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (s[..i].trim(), s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let value: u64 = digits.parse().map_err(|_| QuickVmError::Validation {
        message: format!("invalid size '{s}'"),
    })?;

    let shift = match suffix.as_str() {
        "" | "B" => 0,
        "K" | "KB" => 10,
        "M" | "MB" => 20,
        "G" | "GB" => 30,
        "T" | "TB" => 40,
        _ => {
            return Err(QuickVmError::Validation {
                message: format!("unknown size suffix '{suffix}' in '{s}' (use K, M, G or T)"),
            });
        }
    };

    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| QuickVmError::Validation {
            message: format!("size overflows: '{s}'"),
        })
}

/// Megabytes to gigabytes, rounded to two decimals.
pub fn mb_to_gb(mb: i64) -> f64 {
    (mb as f64 / 1024.0 * 100.0).round() / 100.0
}
