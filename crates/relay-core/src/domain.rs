use std::fmt;

/// Telegram chat or channel id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Portal announcement id: the trailing path segment of its detail link.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnouncementId(pub String);

impl AnnouncementId {
    /// Derive the id from a detail link or href (`/avisos/1001`, `https://x/avisos/1001?y`).
    ///
    /// Query strings, fragments and trailing slashes are ignored. Returns `None`
    /// when no non-empty segment remains.
    pub fn from_link(link: &str) -> Option<Self> {
        let path = link.split(['?', '#']).next().unwrap_or_default();
        let segment = path.trim_end_matches('/').rsplit('/').next()?.trim();
        if segment.is_empty() || segment.contains(':') {
            return None;
        }
        Some(Self(segment.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnnouncementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnnouncementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One row of the portal's announcement listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub id: AnnouncementId,
    /// Timestamp as rendered by the portal (e.g. `18/10/2026 - 09:15`).
    pub timestamp: String,
    pub title: String,
    /// Absolute URL of the detail page.
    pub link: String,
}

/// A file linked from an announcement's detail page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    /// Absolute download URL.
    pub url: String,
}
