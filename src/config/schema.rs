//! Value parsers for config strings.

use std::time::Duration;

/// Parse a human duration such as `"30s"`, `"15m"`, `"24h"`, `"7d"`, or a
/// compound `"1h30m"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_secs: u64 = 0;
    let mut digits = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{}' in '{}'", c, s))?;
        digits.clear();

        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            other => return Err(format!("unknown duration unit '{}' in '{}'", other, s)),
        };
        total_secs = total_secs
            .checked_add(value.saturating_mul(unit))
            .ok_or_else(|| format!("duration overflow: '{}'", s))?;
    }

    // A bare number is seconds
    if !digits.is_empty() {
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{}'", s))?;
        total_secs = total_secs.saturating_add(value);
    }

    if total_secs == 0 {
        return Err(format!("duration must be positive: '{}'", s));
    }

    Ok(Duration::from_secs(total_secs))
}
