//! Delivery of one announcement to the messaging channel.

use std::{path::PathBuf, sync::Arc};

use crate::{
    config::AttachmentMode,
    domain::{Announcement, Attachment, ChatId},
    errors::Error,
    formatting::format_announcement_html,
    messaging::{port::MessagingPort, types::OutgoingDocument},
    ports::AnnouncementSource,
    scratch::ScratchDir,
    store::SeenStore,
    Result,
};

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub chat_id: ChatId,
    pub attachment_mode: AttachmentMode,
    pub scratch_root: PathBuf,
}

/// Sends announcement text and attachments, and records the announcement as seen.
pub struct Dispatcher {
    cfg: DispatchConfig,
    messenger: Arc<dyn MessagingPort>,
    store: Arc<dyn SeenStore>,
}

impl Dispatcher {
    pub fn new(
        cfg: DispatchConfig,
        messenger: Arc<dyn MessagingPort>,
        store: Arc<dyn SeenStore>,
    ) -> Self {
        Self {
            cfg,
            messenger,
            store,
        }
    }

    /// Deliver one announcement.
    ///
    /// The text message goes first and the id is marked seen as soon as it is
    /// out, before any attachment is downloaded. Attachment failures after that
    /// point abort the rest of this announcement and are not retried by later
    /// cycles, so a broken attachment link never re-sends the text. A failed
    /// text message leaves the id unseen for the next cycle.
    pub async fn deliver(
        &self,
        source: &dyn AnnouncementSource,
        announcement: &Announcement,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<()> {
        let caps = self.messenger.capabilities();
        let html = format_announcement_html(announcement, body, caps.max_message_len);

        self.messenger
            .send_html(self.cfg.chat_id, &html)
            .await
            .map_err(|e| Error::Delivery(format!("text message: {e}")))?;
        tracing::info!(id = %announcement.id, title = %announcement.title, "announcement text sent");

        self.store.mark_seen(&announcement.id).await?;

        if attachments.is_empty() {
            return Ok(());
        }

        // Dropping the scratch dir removes the downloads, on success or failure.
        let mut scratch = ScratchDir::create(&self.cfg.scratch_root, announcement.id.as_str())?;
        let mut docs = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let path = scratch.file_path(&attachment.name);
            source
                .download(attachment, &path)
                .await
                .map_err(|e| Error::Delivery(format!("download {}: {e}", attachment.url)))?;
            tracing::debug!(id = %announcement.id, name = %attachment.name, "attachment downloaded");
            docs.push(OutgoingDocument {
                path,
                file_name: attachment.name.clone(),
            });
        }

        self.send_documents(&docs).await?;
        tracing::info!(
            id = %announcement.id,
            count = docs.len(),
            mode = ?self.cfg.attachment_mode,
            "attachments sent"
        );
        Ok(())
    }

    async fn send_documents(&self, docs: &[OutgoingDocument]) -> Result<()> {
        let chat_id = self.cfg.chat_id;
        match self.cfg.attachment_mode {
            AttachmentMode::Individual => {
                for doc in docs {
                    self.messenger
                        .send_document(chat_id, doc)
                        .await
                        .map_err(|e| Error::Delivery(format!("document {}: {e}", doc.file_name)))?;
                }
            }
            AttachmentMode::Grouped => {
                let group_size = self.messenger.capabilities().max_group_size.max(1);
                for chunk in docs.chunks(group_size) {
                    let res = if let [single] = chunk {
                        self.messenger.send_document(chat_id, single).await
                    } else {
                        self.messenger.send_document_group(chat_id, chunk).await
                    };
                    res.map_err(|e| Error::Delivery(format!("document group: {e}")))?;
                }
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::store::MemorySeenStore;

    fn scratch_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dispatch-{tag}-{}", std::process::id()))
    }

    fn dispatcher(
        mode: AttachmentMode,
        tag: &str,
        messenger: Arc<FakeMessenger>,
        store: Arc<MemorySeenStore>,
    ) -> Dispatcher {
        Dispatcher::new(
            DispatchConfig {
                chat_id: ChatId(42),
                attachment_mode: mode,
                scratch_root: scratch_root(tag),
            },
            messenger,
            store,
        )
    }

    #[tokio::test]
    async fn text_only_announcement_is_sent_and_marked() {
        let messenger = Arc::new(FakeMessenger::default());
        let store = Arc::new(MemorySeenStore::new());
        let d = dispatcher(AttachmentMode::Grouped, "text", messenger.clone(), store.clone());
        let portal = FakePortal::default();

        d.deliver(&portal, &announcement("1001"), "corpo", &[])
            .await
            .unwrap();

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::Html(h) if h.contains("Aviso 1001") && h.contains("corpo")));
        assert!(store.has(&"1001".into()).await.unwrap());
    }

    #[tokio::test]
    async fn grouped_mode_chunks_by_ten_and_sends_lone_document_alone() {
        let messenger = Arc::new(FakeMessenger::default());
        let store = Arc::new(MemorySeenStore::new());
        let d = dispatcher(AttachmentMode::Grouped, "grouped", messenger.clone(), store);
        let portal = FakePortal::default();

        d.deliver(&portal, &announcement("1002"), "corpo", &attachments(11))
            .await
            .unwrap();

        let sent = messenger.sent();
        assert_eq!(sent.len(), 3);
        assert!(matches!(&sent[1], Sent::Group(names) if names.len() == 10));
        assert_eq!(sent[2], Sent::Document("anexo-11.pdf".to_string()));
        assert!(messenger.files_present.lock().unwrap().iter().all(|p| *p));
    }

    #[tokio::test]
    async fn individual_mode_sends_one_message_per_attachment() {
        let messenger = Arc::new(FakeMessenger::default());
        let store = Arc::new(MemorySeenStore::new());
        let d = dispatcher(AttachmentMode::Individual, "individual", messenger.clone(), store);
        let portal = FakePortal::default();

        d.deliver(&portal, &announcement("1003"), "corpo", &attachments(3))
            .await
            .unwrap();

        assert_eq!(
            messenger.sent()[1..],
            [
                Sent::Document("anexo-1.pdf".to_string()),
                Sent::Document("anexo-2.pdf".to_string()),
                Sent::Document("anexo-3.pdf".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn scratch_files_are_removed_after_delivery() {
        let messenger = Arc::new(FakeMessenger::default());
        let store = Arc::new(MemorySeenStore::new());
        let d = dispatcher(AttachmentMode::Grouped, "cleanup", messenger, store);
        let portal = FakePortal::default();

        d.deliver(&portal, &announcement("1004"), "corpo", &attachments(2))
            .await
            .unwrap();

        let root = scratch_root("cleanup");
        let leftovers = std::fs::read_dir(&root)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn download_failure_aborts_after_text_and_keeps_mark() {
        let messenger = Arc::new(FakeMessenger::default());
        let store = Arc::new(MemorySeenStore::new());
        let d = dispatcher(AttachmentMode::Grouped, "dlfail", messenger.clone(), store.clone());
        let portal = FakePortal {
            fail_downloads: true,
            ..FakePortal::default()
        };

        let err = d
            .deliver(&portal, &announcement("1005"), "corpo", &attachments(2))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Delivery(_)));
        assert_eq!(messenger.sent().len(), 1);
        assert!(store.has(&"1005".into()).await.unwrap());
    }

    #[tokio::test]
    async fn upload_failure_is_delivery_error() {
        let messenger = Arc::new(FakeMessenger {
            fail_documents: true,
            ..FakeMessenger::default()
        });
        let store = Arc::new(MemorySeenStore::new());
        let d = dispatcher(AttachmentMode::Individual, "upfail", messenger.clone(), store);
        let portal = FakePortal::default();

        let err = d
            .deliver(&portal, &announcement("1006"), "corpo", &attachments(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Delivery(_)));
        assert_eq!(messenger.html_count(), 1);
    }
}
