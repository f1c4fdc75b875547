//! End-to-end dump runs against an in-memory store and a scripted history
//! source.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatdump_db::models::{ChatRecord, CHATS_COLLECTION};
use chatdump_db::{DocumentStore, MemoryStore, StoreError};
use chatdump_dumper::{run_with, ChatSelection, DumperConfig, HistorySource};
use chatdump_icq::{Buddy, HistoryMessage, HistoryResults, IcqApiError};
use serde_json::{json, Value};
use tokio::sync::oneshot;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(chat: ChatSelection, page_size: u32) -> DumperConfig {
    let mut config = DumperConfig::from_lookup(|var| match var {
        "ICQ_AIMSID" => Some("test-session".into()),
        "WORKER_COUNT" => Some("2".into()),
        "QUEUE_CAPACITY" => Some("4".into()),
        "WORKER_CAPACITY" => Some("2".into()),
        _ => None,
    })
    .unwrap();
    config.chat = chat;
    config.page_size = page_size;
    config
}

fn buddy(aim_id: &str, friendly: &str) -> Buddy {
    Buddy {
        aim_id: aim_id.into(),
        display_id: None,
        friendly: Some(friendly.into()),
        user_type: None,
    }
}

fn message(msg_id: u64) -> HistoryMessage {
    HistoryMessage {
        msg_id,
        time: 1_600_000_000 + msg_id as i64,
        wid: format!("w{msg_id}"),
        chat: None,
        text: format!("message {msg_id}"),
        outgoing: false,
    }
}

/// History source serving fixed message lists. Pages include the message
/// at the cursor, like the real API.
#[derive(Default)]
struct ScriptedSource {
    buddies: Vec<Buddy>,
    history: HashMap<String, Vec<u64>>,
    broken: HashSet<String>,
    requests: AtomicU32,
    /// Fired on the second history request.
    on_second_request: Mutex<Option<oneshot::Sender<()>>>,
}

impl ScriptedSource {
    fn with_chat(mut self, aim_id: &str, message_count: u64) -> Self {
        self.buddies.push(buddy(aim_id, &format!("Chat {aim_id}")));
        self.history.insert(aim_id.into(), (1..=message_count).collect());
        self
    }

    fn with_broken_chat(mut self, aim_id: &str) -> Self {
        self.buddies.push(buddy(aim_id, "Broken"));
        self.broken.insert(aim_id.into());
        self
    }
}

#[async_trait]
impl HistorySource for ScriptedSource {
    async fn buddies(&self) -> Result<Vec<Buddy>, IcqApiError> {
        Ok(self.buddies.clone())
    }

    async fn history(&self, chat_id: &str, from_msg_id: u64, count: u32) -> Result<HistoryResults, IcqApiError> {
        if self.requests.fetch_add(1, Ordering::SeqCst) == 1 {
            let trigger = self.on_second_request.lock().unwrap().take();
            if let Some(trigger) = trigger {
                let _ = trigger.send(());
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        if self.broken.contains(chat_id) {
            return Err(IcqApiError::ApiError {
                status: 502,
                body: "bad gateway".into(),
            });
        }

        let messages = self
            .history
            .get(chat_id)
            .map(|ids| {
                ids.iter()
                    .filter(|&&id| id >= from_msg_id)
                    .take(count as usize)
                    .map(|&id| message(id))
                    .collect()
            })
            .unwrap_or_default();
        Ok(HistoryResults {
            messages,
            ..Default::default()
        })
    }
}

/// Memory store whose `update_one` fails a set number of times first.
struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicU32,
    update_calls: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
            update_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn insert_one(&self, collection: &str, doc: Value) -> Result<String, StoreError> {
        self.inner.insert_one(collection, doc).await
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<String>, StoreError> {
        self.inner.insert_many(collection, docs).await
    }

    async fn update_one(&self, collection: &str, filter: Value, update: Value) -> Result<bool, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::InvalidUpdate("simulated outage".into()));
        }
        self.inner.update_one(collection, filter, update).await
    }

    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>, StoreError> {
        self.inner.find(collection, filter).await
    }
}

async fn stored_chat(store: &dyn DocumentStore, aim_id: &str) -> ChatRecord {
    let found = store.find(CHATS_COLLECTION, ChatRecord::filter(aim_id)).await.unwrap();
    assert_eq!(found.len(), 1, "expected one document for chat {aim_id}");
    serde_json::from_value(found[0].clone()).unwrap()
}

fn message_ids(chat: &ChatRecord) -> Vec<u64> {
    chat.messages.iter().map(|m| m.msg_id).collect()
}

// ---------------------------------------------------------------------------
// Test: full runs
// ---------------------------------------------------------------------------

/// Every chat from the buddy list is stored with its complete history,
/// without duplicating the message at each page boundary.
#[tokio::test]
async fn dumps_every_chat_in_buddy_list() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::default().with_chat("a", 3).with_chat("b", 250);

    let summary = run_with(
        &config(ChatSelection::All, 100),
        store.clone(),
        Arc::new(source),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(summary.chats, 2);
    assert_eq!(summary.pages, 4);
    assert_eq!(summary.messages, 253);
    assert_eq!(summary.dropped_pages, 0);
    assert!(summary.failed_chats.is_empty());
    assert!(!summary.interrupted);

    let a = stored_chat(store.as_ref(), "a").await;
    assert_eq!(a.name, "Chat a");
    assert_eq!(message_ids(&a), vec![1, 2, 3]);

    // Pages run on parallel workers; stored messages are still in id order.
    let b = stored_chat(store.as_ref(), "b").await;
    assert_eq!(message_ids(&b), (1..=250).collect::<Vec<_>>());
}

/// A single selected chat is dumped even though no chat document exists yet.
#[tokio::test]
async fn dumps_single_chat() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::default().with_chat("solo", 5).with_chat("other", 5);

    let summary = run_with(
        &config(ChatSelection::One("solo".into()), 2),
        store.clone(),
        Arc::new(source),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(summary.chats, 1);
    assert_eq!(summary.messages, 5);

    let solo = stored_chat(store.as_ref(), "solo").await;
    assert_eq!(message_ids(&solo), vec![1, 2, 3, 4, 5]);
    assert!(store.find(CHATS_COLLECTION, ChatRecord::filter("other")).await.unwrap().is_empty());
}

/// A chat whose history cannot be fetched is recorded and skipped.
#[tokio::test]
async fn fetch_error_skips_chat() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::default()
        .with_broken_chat("broken")
        .with_chat("fine", 2);

    let summary = run_with(
        &config(ChatSelection::All, 100),
        store.clone(),
        Arc::new(source),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(summary.failed_chats, vec!["broken".to_string()]);
    assert_eq!(message_ids(&stored_chat(store.as_ref(), "fine").await), vec![1, 2]);
    assert!(stored_chat(store.as_ref(), "broken").await.messages.is_empty());
}

// ---------------------------------------------------------------------------
// Test: retries through the store
// ---------------------------------------------------------------------------

/// Transient store failures are retried and the page lands exactly once.
#[tokio::test]
async fn transient_store_failures_are_retried() {
    let store = Arc::new(FlakyStore::new(2));
    let source = ScriptedSource::default().with_chat("c", 3);

    let summary = run_with(
        &config(ChatSelection::All, 100),
        store.clone(),
        Arc::new(source),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(summary.dropped_pages, 0);
    assert_eq!(store.update_calls.load(Ordering::SeqCst), 3);
    assert_eq!(message_ids(&stored_chat(store.as_ref(), "c").await), vec![1, 2, 3]);
}

/// A page whose writes keep failing is dropped after three attempts.
#[tokio::test]
async fn persistent_store_failure_drops_page() {
    let store = Arc::new(FlakyStore::new(u32::MAX));
    let source = ScriptedSource::default().with_chat("c", 3);

    let summary = run_with(
        &config(ChatSelection::All, 100),
        store.clone(),
        Arc::new(source),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(summary.pages, 1);
    assert_eq!(summary.dropped_pages, 1);
    assert_eq!(store.update_calls.load(Ordering::SeqCst), 3);
    assert!(stored_chat(store.as_ref(), "c").await.messages.is_empty());
}

// ---------------------------------------------------------------------------
// Test: shutdown
// ---------------------------------------------------------------------------

/// A shutdown signal mid-walk stops the producer and the run still returns.
#[tokio::test]
async fn shutdown_signal_interrupts_walk() {
    let (trigger, signal) = oneshot::channel();
    let source = ScriptedSource::default().with_chat("long", 50);
    *source.on_second_request.lock().unwrap() = Some(trigger);

    let summary = run_with(
        &config(ChatSelection::One("long".into()), 10),
        Arc::new(MemoryStore::new()),
        Arc::new(source),
        async move {
            let _ = signal.await;
        },
    )
    .await
    .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.pages, 1);
}

/// The chat list job itself goes through the dispatcher and lands in the
/// chats collection before any history is pushed.
#[tokio::test]
async fn chat_list_is_stored_for_empty_chats() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::default().with_chat("empty", 0);

    let summary = run_with(
        &config(ChatSelection::All, 100),
        store.clone(),
        Arc::new(source),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(summary.pages, 0);
    let docs = store.find(CHATS_COLLECTION, json!({})).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["name"], "Chat empty");
}
