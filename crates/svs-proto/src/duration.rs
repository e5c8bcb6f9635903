//! Duration strings.
//!
//! Timed bans and suspensions take durations like `2w`, `3d12h` or a bare
//! minute count. Units: `w`eeks, `d`ays, `h`ours, `m`inutes, `s`econds.

/// Parse a duration string into seconds.
///
/// A bare number is minutes, matching the classic kline convention.
/// Returns `None` on empty input, unknown units, or overflow.
pub fn parse_duration(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<u64>().ok()?.checked_mul(60);
    }

    let mut total: u64 = 0;
    let mut acc: u64 = 0;
    let mut have_digit = false;

    for c in s.chars() {
        if let Some(d) = c.to_digit(10) {
            acc = acc.checked_mul(10)?.checked_add(d as u64)?;
            have_digit = true;
            continue;
        }

        let unit: u64 = match c {
            'w' | 'W' => 604_800,
            'd' | 'D' => 86_400,
            'h' | 'H' => 3_600,
            'm' | 'M' => 60,
            's' | 'S' => 1,
            _ => return None,
        };

        if !have_digit {
            return None;
        }
        total = total.checked_add(acc.checked_mul(unit)?)?;
        acc = 0;
        have_digit = false;
    }

    // Trailing digits without a unit are invalid in mixed form.
    if have_digit {
        return None;
    }
    Some(total)
}

/// Humanize a second count for notices: `1 week, 2 days, 3 hours`.
pub fn format_duration(mut secs: u64) -> String {
    if secs == 0 {
        return "0 seconds".to_string();
    }

    const UNITS: &[(u64, &str)] = &[
        (604_800, "week"),
        (86_400, "day"),
        (3_600, "hour"),
        (60, "minute"),
        (1, "second"),
    ];

    let mut parts = Vec::new();
    for &(size, name) in UNITS {
        let n = secs / size;
        secs %= size;
        if n > 0 {
            parts.push(format!("{} {}{}", n, name, if n == 1 { "" } else { "s" }));
        }
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_is_minutes() {
        assert_eq!(parse_duration("60"), Some(3600));
        assert_eq!(parse_duration("0"), Some(0));
    }

    #[test]
    fn mixed_units() {
        assert_eq!(parse_duration("1w"), Some(604_800));
        assert_eq!(parse_duration("1d12h"), Some(86_400 + 12 * 3600));
        assert_eq!(parse_duration("2H30M"), Some(9000));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("x"), None);
        assert_eq!(parse_duration("1d5"), None);
        assert_eq!(parse_duration("d"), None);
    }

    #[test]
    fn humanizes() {
        assert_eq!(format_duration(0), "0 seconds");
        assert_eq!(format_duration(61), "1 minute, 1 second");
        assert_eq!(format_duration(604_800 + 7200), "1 week, 2 hours");
    }
}
