use chrono::{DateTime, Local, Utc};

/// Truncate a string to at most `max_len` characters, adding an ellipsis if needed
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

/// Format an optional string, returning a default if None or blank
pub fn format_optional(value: Option<&str>, default: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

/// Calendar date in the local timezone, e.g. "Mar 05, 2025"
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.with_timezone(&Local).format("%b %d, %Y").to_string()
}

/// Local date and time, e.g. "2025-03-05 14:30"
pub fn format_timestamp(date: &DateTime<Utc>) -> String {
    date.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Hello", 10), "Hello");
        assert_eq!(truncate("Hello World", 8), "Hello...");
        assert_eq!(truncate("Hi", 2), "Hi");
        assert_eq!(truncate("Niñas Farm Co-op", 8), "Niñas...");
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(Some("Green Valley"), "-"), "Green Valley");
        assert_eq!(format_optional(Some("  "), "-"), "-");
        assert_eq!(format_optional(None, "-"), "-");
    }

    #[test]
    fn test_format_date_shape() {
        let date = DateTime::parse_from_rfc3339("2025-03-05T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let formatted = format_date(&date);
        assert!(formatted.ends_with(", 2025"));
        assert!(formatted.starts_with("Mar"));
        assert_eq!(format_timestamp(&date).len(), 16);
    }
}
