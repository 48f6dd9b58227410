use chrono::{DateTime, Utc};

/// Human-readable age of a timestamp relative to now ("just now", "5m ago",
/// "2h ago", "3d ago"). Hours and days round half up.
pub fn age_display(at: DateTime<Utc>) -> String {
    age_display_minutes((Utc::now() - at).num_minutes())
}

fn age_display_minutes(minutes: i64) -> String {
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

/// Format a byte count with a binary unit suffix.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_age_display_just_now() {
        assert_eq!(age_display(Utc::now()), "just now");
        // Future timestamps from clock skew
        assert_eq!(age_display(Utc::now() + Duration::minutes(5)), "just now");
    }

    #[test]
    fn test_age_display_rounding() {
        assert_eq!(age_display_minutes(5), "5m ago");
        assert_eq!(age_display_minutes(89), "1h ago");
        assert_eq!(age_display_minutes(90), "2h ago");
        assert_eq!(age_display_minutes(1440 + 11 * 60), "1d ago");
        assert_eq!(age_display_minutes(1440 + 12 * 60), "2d ago");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hello", 2), "he");
    }
}
