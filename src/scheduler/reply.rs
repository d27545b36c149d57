/// Build the countdown reply. Zero minutes means the slot is happening now.
pub fn format_reply(label: &str, minutes: u64) -> String {
    if minutes == 0 {
        return format!("☕️ It's FIKA time right now ({label})!");
    }
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    format!("☕️ Next fika is at {label} (local).\n⏳ {minutes} {unit} left.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_minutes_is_fika_now() {
        assert_eq!(
            format_reply("10:00", 0),
            "☕️ It's FIKA time right now (10:00)!"
        );
    }

    #[test]
    fn test_singular_minute() {
        assert_eq!(
            format_reply("15:00", 1),
            "☕️ Next fika is at 15:00 (local).\n⏳ 1 minute left."
        );
    }

    #[test]
    fn test_plural_minutes() {
        let out = format_reply("10:00", 42);
        assert!(out.starts_with("☕️ Next fika is at 10:00 (local).\n"));
        assert!(out.ends_with("42 minutes left."));
    }
}
