//! History producer: walks chat history page by page and submits one
//! parse-chat-messages job per page.
//!
//! The walk for a chat starts at [`FIRST_MESSAGE_ID`] and uses the last
//! message id of each page as the cursor for the next request. It ends on an
//! empty page, on a page with nothing newer than the cursor, or on the first
//! fetch error (logged, and recorded in the [`DumpSummary`]).

use std::sync::Arc;

use async_trait::async_trait;
use chatdump_core::types::{ChatId, MessageId, FIRST_MESSAGE_ID};
use chatdump_db::models::{ChatRecord, CHATS_COLLECTION};
use chatdump_db::DocumentStore;
use chatdump_icq::{next_cursor, Buddy, HistoryResults, IcqApi, IcqApiError};
use chatdump_queue::{DispatchError, DispatcherHandle, Job, JobOutcome, Payload};
use tokio::sync::oneshot;

use crate::config::ChatSelection;
use crate::hooks::HistoryPage;

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Where chat lists and history pages come from.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn buddies(&self) -> Result<Vec<Buddy>, IcqApiError>;

    async fn history(
        &self,
        chat_id: &str,
        from_msg_id: MessageId,
        count: u32,
    ) -> Result<HistoryResults, IcqApiError>;
}

#[async_trait]
impl HistorySource for IcqApi {
    async fn buddies(&self) -> Result<Vec<Buddy>, IcqApiError> {
        self.get_buddy_list().await
    }

    async fn history(
        &self,
        chat_id: &str,
        from_msg_id: MessageId,
        count: u32,
    ) -> Result<HistoryResults, IcqApiError> {
        self.get_history(chat_id, from_msg_id, count).await
    }
}

// ---------------------------------------------------------------------------
// Errors and summary
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Could not fetch chat list: {0}")]
    ChatList(#[from] IcqApiError),

    #[error("Could not store chat list: {0}")]
    ChatListNotStored(String),

    #[error("Could not encode job payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// What a dump run achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    /// Chats whose history walk was started.
    pub chats: usize,
    /// Pages submitted as jobs.
    pub pages: usize,
    /// Messages on submitted pages.
    pub messages: usize,
    /// Pages whose job ran out of retries.
    pub dropped_pages: usize,
    /// Pages discarded by shutdown before they ran.
    pub discarded_pages: usize,
    /// Chats whose walk ended on a fetch error.
    pub failed_chats: Vec<ChatId>,
    /// Whether the run stopped early because the dispatcher shut down.
    pub interrupted: bool,
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

pub struct HistoryProducer {
    source: Arc<dyn HistorySource>,
    store: Arc<dyn DocumentStore>,
    dispatcher: DispatcherHandle,
    page_size: u32,
}

impl HistoryProducer {
    pub fn new(
        source: Arc<dyn HistorySource>,
        store: Arc<dyn DocumentStore>,
        dispatcher: DispatcherHandle,
        page_size: u32,
    ) -> Self {
        Self {
            source,
            store,
            dispatcher,
            page_size,
        }
    }

    /// Dump the selected chats and wait for every submitted page to reach
    /// an outcome.
    pub async fn run(&self, selection: &ChatSelection) -> Result<DumpSummary, ProducerError> {
        let chats = match selection {
            ChatSelection::One(chat_id) => vec![ChatRecord::new(chat_id.as_str(), chat_id.as_str())],
            ChatSelection::All => self
                .source
                .buddies()
                .await?
                .iter()
                .map(|buddy| ChatRecord::new(buddy.display_name(), buddy.aim_id.as_str()))
                .collect(),
        };
        let chat_ids: Vec<ChatId> = chats.iter().map(|chat| chat.aim_id.clone()).collect();
        self.ensure_chats(chats).await?;
        tracing::info!(chats = chat_ids.len(), "Dumping chat history");

        let mut summary = DumpSummary::default();
        let mut pending = Vec::new();

        for chat_id in &chat_ids {
            if self.dispatcher.is_destroyed() {
                summary.interrupted = true;
                break;
            }
            summary.chats += 1;
            if !self.dump_chat(chat_id, &mut summary, &mut pending).await? {
                summary.interrupted = true;
                break;
            }
        }

        for rx in pending {
            match rx.await {
                Ok(JobOutcome::Done { .. }) | Ok(JobOutcome::Ignored) => {}
                Ok(JobOutcome::Dropped { .. }) => summary.dropped_pages += 1,
                Err(_) => summary.discarded_pages += 1,
            }
        }

        Ok(summary)
    }

    /// Store a document for every chat that does not have one yet, through
    /// the dispatcher like any other write. History pages are only pushed
    /// once this has finished.
    async fn ensure_chats(&self, chats: Vec<ChatRecord>) -> Result<(), ProducerError> {
        if chats.is_empty() {
            tracing::warn!("Chat list is empty, nothing to dump");
            return Ok(());
        }
        let docs = chats
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        let store = Arc::clone(&self.store);
        let (job, rx) = Job::custom(Payload::Many(docs), move |payload| {
            let store = Arc::clone(&store);
            async move {
                let mut missing = Vec::new();
                for doc in payload.values() {
                    let aim_id = doc["aimId"].as_str().unwrap_or_default();
                    if store.find(CHATS_COLLECTION, ChatRecord::filter(aim_id)).await?.is_empty() {
                        missing.push(doc.clone());
                    }
                }
                let stored = missing.len();
                if stored > 0 {
                    store.insert_many(CHATS_COLLECTION, missing).await?;
                }
                tracing::info!(stored, existing = payload.len() - stored, "Chat list stored");
                Ok::<_, anyhow::Error>(())
            }
        })
        .with_completion();
        self.dispatcher.enqueue(job).await?;

        match rx.await {
            Ok(JobOutcome::Done { .. }) => Ok(()),
            Ok(JobOutcome::Dropped { cause, .. }) => Err(ProducerError::ChatListNotStored(cause)),
            Ok(JobOutcome::Ignored) | Err(_) => Err(ProducerError::ChatListNotStored(
                "job discarded before it ran".into(),
            )),
        }
    }

    /// Walk one chat. Returns `false` when the dispatcher stopped accepting
    /// jobs mid-walk.
    async fn dump_chat(
        &self,
        chat_id: &str,
        summary: &mut DumpSummary,
        pending: &mut Vec<oneshot::Receiver<JobOutcome>>,
    ) -> Result<bool, ProducerError> {
        let mut cursor = FIRST_MESSAGE_ID;
        let mut last_seen: Option<MessageId> = None;

        loop {
            let results = match self.source.history(chat_id, cursor, self.page_size).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::error!(chat_id, cursor, error = %e, "Could not fetch history page, skipping rest of chat");
                    summary.failed_chats.push(chat_id.to_string());
                    return Ok(true);
                }
            };

            // Pages start at the cursor, so the previous page's last message
            // comes back first.
            let messages: Vec<_> = results
                .messages
                .into_iter()
                .filter(|message| last_seen.map_or(true, |seen| message.msg_id > seen))
                .collect();
            let Some(next) = next_cursor(&messages) else {
                tracing::info!(chat_id, "Chat history exhausted");
                return Ok(true);
            };

            let count = messages.len();
            let page = HistoryPage {
                chat_id: chat_id.to_string(),
                messages,
            };
            let (job, rx) = Job::parse_chat_messages(serde_json::to_value(&page)?).with_completion();

            match self.dispatcher.enqueue(job).await {
                Ok(()) => {}
                Err(DispatchError::ShuttingDown) => {
                    tracing::info!(chat_id, "Dispatcher shutting down, stopping history walk");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
            tracing::debug!(chat_id, from_msg_id = cursor, count, next, "Submitted history page");

            pending.push(rx);
            summary.pages += 1;
            summary.messages += count;
            last_seen = Some(next);
            cursor = next;
        }
    }
}
