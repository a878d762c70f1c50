use std::path::PathBuf;

/// A local file to upload as a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingDocument {
    pub path: PathBuf,
    /// File name shown to recipients.
    pub file_name: String,
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub max_message_len: usize,
    /// Largest number of documents a grouped message may carry.
    pub max_group_size: usize,
}

impl Default for MessagingCapabilities {
    fn default() -> Self {
        // Telegram Bot API limits.
        Self {
            max_message_len: 4096,
            max_group_size: 10,
        }
    }
}
