//! Human-readable run durations for summary lines.

const UNITS: [(u64, &str); 3] = [(86_400, "day"), (3_600, "hour"), (60, "minute")];

/// Split seconds into `(days, hours, minutes, seconds)`.
pub fn breakdown(mut secs: u64) -> (u64, u64, u64, u64) {
    let mut parts = [0u64; 3];
    for (slot, (unit, _)) in parts.iter_mut().zip(UNITS) {
        *slot = secs / unit;
        secs %= unit;
    }
    (parts[0], parts[1], parts[2], secs)
}

/// Long form, e.g. `2 days, 1 hour, 1 second`.
///
/// Zero units are omitted except seconds, which are always present.
pub fn describe(secs: u64) -> String {
    let (days, hours, minutes, seconds) = breakdown(secs);
    let mut parts = Vec::new();
    for (value, (_, label)) in [days, hours, minutes].into_iter().zip(UNITS) {
        if value > 0 {
            parts.push(pluralize(value, label));
        }
    }
    parts.push(pluralize(seconds, "second"));
    parts.join(", ")
}

fn pluralize(value: u64, label: &str) -> String {
    if value == 1 {
        format!("{value} {label}")
    } else {
        format!("{value} {label}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaks_down_days_hours_minutes_seconds() {
        assert_eq!(breakdown(86_400 * 2 + 3_661), (2, 1, 1, 1));
        assert_eq!(breakdown(60), (0, 0, 1, 0));
    }

    #[test]
    fn describes_long_form() {
        assert_eq!(
            describe(86_400 * 2 + 3_661),
            "2 days, 1 hour, 1 minute, 1 second"
        );
        assert_eq!(describe(125), "2 minutes, 5 seconds");
        assert_eq!(describe(0), "0 seconds");
        assert_eq!(describe(3_600), "1 hour, 0 seconds");
    }
}
