use std::{path::Path, sync::Arc};

use async_trait::async_trait;

use crate::{
    domain::{Announcement, Attachment},
    Result,
};

/// Logs into the portal and hands back an authenticated source.
///
/// Called once per process; failure is fatal.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<Arc<dyn AnnouncementSource>>;
}

/// Read side of an authenticated portal session.
///
/// The listing and detail reads never fail: they degrade to an empty result or a
/// sentinel body and log the cause, so one bad page never stops the loop.
#[async_trait]
pub trait AnnouncementSource: Send + Sync {
    /// Today's announcements, in document order.
    async fn list_todays_announcements(&self) -> Vec<Announcement>;

    /// Body text of the detail page at `link`, or one of the body sentinels.
    async fn fetch_body(&self, link: &str) -> String;

    /// Attachments linked from the detail page at `link`.
    async fn fetch_attachments(&self, link: &str) -> Vec<Attachment>;

    /// Stream one attachment to `dest`.
    async fn download(&self, attachment: &Attachment, dest: &Path) -> Result<()>;
}

/// Body returned when the detail page has no content region.
pub const BODY_UNAVAILABLE: &str = "Content not available.";

/// Body returned when the detail page could not be fetched.
pub const BODY_ERROR: &str = "Failed to extract content.";
