//! Telegram HTML rendering of announcements.

use crate::domain::Announcement;

/// Escape HTML special characters for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Length as Telegram counts it: UTF-16 code units.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Truncate to at most `max_units` UTF-16 code units, ending with `...` when cut.
///
/// Never splits a character; a surrogate pair that does not fit is dropped whole.
pub fn truncate_text(s: &str, max_units: usize) -> String {
    if utf16_len(s) <= max_units {
        return s.to_string();
    }
    let keep = max_units.saturating_sub(3);
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        used += c.len_utf16();
        if used > keep {
            break;
        }
        out.push(c);
    }
    out.push_str("...");
    out
}

/// Insert a line break after every occurrence of the sign-off `marker`.
pub fn break_after_signoff(text: &str, marker: &str) -> String {
    if marker.is_empty() {
        return text.to_string();
    }
    text.replace(marker, &format!("{marker}\n"))
}

/// Render the announcement text message.
///
/// Title, timestamp and body are escaped; the body is shortened so the whole
/// message stays within `max_len` UTF-16 code units.
pub fn format_announcement_html(announcement: &Announcement, body: &str, max_len: usize) -> String {
    let head = format!(
        "<b>{}</b>\n<b>Date/Time:</b> <code>{}</code>\n\n",
        escape_html(&announcement.title),
        escape_html(&announcement.timestamp),
    );
    const QUOTE_OPEN: &str = "<blockquote>";
    const QUOTE_CLOSE: &str = "</blockquote>";

    let overhead = utf16_len(&head) + utf16_len(QUOTE_OPEN) + utf16_len(QUOTE_CLOSE);
    let budget = max_len.saturating_sub(overhead);

    let mut quoted = escape_html(body);
    if utf16_len(&quoted) > budget {
        // Cut the raw body, then re-escape, so entities are never split.
        let mut raw_budget = budget;
        loop {
            let candidate = escape_html(&truncate_text(body, raw_budget));
            let len = utf16_len(&candidate);
            if len <= budget || raw_budget == 0 {
                quoted = candidate;
                break;
            }
            raw_budget -= (len - budget).min(raw_budget);
        }
    }

    format!("{head}{QUOTE_OPEN}{quoted}{QUOTE_CLOSE}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AnnouncementId;

    fn announcement(title: &str) -> Announcement {
        Announcement {
            id: AnnouncementId::from("1001"),
            timestamp: "18/10/2026 - 09:15".to_string(),
            title: title.to_string(),
            link: "https://portal.example/avisos/1001".to_string(),
        }
    }

    #[test]
    fn renders_title_timestamp_and_quoted_body() {
        let html = format_announcement_html(&announcement("Escala <extra>"), "Corpo & texto", 4096);
        assert_eq!(
            html,
            "<b>Escala &lt;extra&gt;</b>\n<b>Date/Time:</b> <code>18/10/2026 - 09:15</code>\n\n\
             <blockquote>Corpo &amp; texto</blockquote>"
        );
    }

    #[test]
    fn long_body_fits_message_limit() {
        let body = "a&b ".repeat(2000);
        let html = format_announcement_html(&announcement("T"), &body, 4096);
        assert!(utf16_len(&html) <= 4096);
        assert!(html.ends_with("...</blockquote>"));
        assert!(!html.contains("&am...") && !html.contains("&a..."));
    }

    #[test]
    fn emoji_body_fits_limit_in_utf16_units() {
        let body = "🚒".repeat(5000);
        let html = format_announcement_html(&announcement("Incêndio 🔥"), &body, 4096);
        assert!(html.encode_utf16().count() <= 4096);
        assert!(html.encode_utf16().count() > 4000);
        assert!(html.ends_with("🚒...</blockquote>"));
    }

    #[test]
    fn signoff_gets_line_break() {
        let text = "Cumpra-se. FULANO - CEL BM Comandante";
        assert_eq!(
            break_after_signoff(text, " - CEL BM"),
            "Cumpra-se. FULANO - CEL BM\n Comandante"
        );
        assert_eq!(break_after_signoff(text, ""), text);
    }

    #[test]
    fn truncate_text_adds_ellipsis() {
        assert_eq!(truncate_text("abcdef", 5), "ab...");
        assert_eq!(truncate_text("abc", 5), "abc");
    }

    #[test]
    fn truncate_text_never_splits_surrogate_pairs() {
        // Each emoji is two UTF-16 units; 6 units leave room for one plus "...".
        assert_eq!(truncate_text("🚒🚒🚒🚒", 6), "🚒...");
        assert_eq!(truncate_text("🚒🚒🚒🚒", 5), "🚒...");
        assert_eq!(truncate_text("🚒🚒", 4), "🚒🚒");
    }
}
