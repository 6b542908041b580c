use chrono::{DateTime, Local, Utc};

pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(time) => time
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}

/// First line of `text`, cut to `max` characters.
pub fn excerpt(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max && !text.contains('\n') {
        return line.to_string();
    }
    let cut: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_keeps_short_single_lines() {
        assert_eq!(excerpt("drafted intro", 20), "drafted intro");
        assert_eq!(excerpt("", 20), "");
    }

    #[test]
    fn excerpt_truncates_long_or_multiline_text() {
        assert_eq!(excerpt("abcdefghij", 6), "abc...");
        assert_eq!(excerpt("first\nsecond", 20), "first...");
    }

    #[test]
    fn missing_time_is_a_dash() {
        assert_eq!(format_time(None), "-");
    }
}
