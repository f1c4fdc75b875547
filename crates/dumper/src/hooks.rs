//! [`ActionHooks`] that persist chat history through a [`DocumentStore`].

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chatdump_core::types::ChatId;
use chatdump_db::models::{ChatMessageRecord, ChatRecord, CHATS_COLLECTION, MESSAGES_COLLECTION};
use chatdump_db::DocumentStore;
use chatdump_icq::HistoryMessage;
use chatdump_queue::{ActionHooks, Payload};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Payload of a parse-chat-messages job: one page of one chat's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub chat_id: ChatId,
    pub messages: Vec<HistoryMessage>,
}

impl HistoryPage {
    /// Stored form of every message on the page.
    pub fn records(&self) -> Vec<ChatMessageRecord> {
        self.messages
            .iter()
            .map(|message| {
                ChatMessageRecord::from_unix(
                    message.msg_id,
                    message.time,
                    message.wid.as_str(),
                    message.sender(),
                    message.text.as_str(),
                )
            })
            .collect()
    }
}

pub struct StoreHooks {
    store: Arc<dyn DocumentStore>,
}

impl StoreHooks {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActionHooks for StoreHooks {
    /// Push the page onto its chat document, creating the document when the
    /// chat was not in the buddy list. Pages of one chat can land in any
    /// order, so the stored messages are kept sorted by message id.
    async fn parse_chat_messages(&self, payload: &Payload) -> anyhow::Result<()> {
        for value in payload.values() {
            let page: HistoryPage =
                serde_json::from_value(value.clone()).context("payload is not a history page")?;
            let records = page.records();
            let count = records.len();

            let matched = self
                .store
                .update_one(
                    CHATS_COLLECTION,
                    ChatRecord::filter(&page.chat_id),
                    json!({ "$push": { "messages": {
                        "$each": records,
                        "$sort": { "msgId": 1 },
                    } } }),
                )
                .await?;

            if !matched {
                let chat = ChatRecord {
                    messages: page.records(),
                    ..ChatRecord::new(page.chat_id.as_str(), page.chat_id.as_str())
                };
                self.store
                    .insert_one(CHATS_COLLECTION, serde_json::to_value(chat)?)
                    .await?;
            }

            tracing::debug!(chat_id = %page.chat_id, count, created = !matched, "Stored history page");
        }
        Ok(())
    }

    /// Insert each message into the messages collection.
    async fn save_chat_message(&self, payload: &Payload) -> anyhow::Result<()> {
        let mut docs = Vec::with_capacity(payload.len());
        for value in payload.values() {
            let record: ChatMessageRecord =
                serde_json::from_value(value.clone()).context("payload is not a chat message")?;
            docs.push(serde_json::to_value(record)?);
        }

        match docs.len() {
            0 => {}
            1 => {
                let doc = docs.remove(0);
                self.store.insert_one(MESSAGES_COLLECTION, doc).await?;
            }
            _ => {
                self.store.insert_many(MESSAGES_COLLECTION, docs).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chatdump_db::MemoryStore;
    use chatdump_icq::types::MessageChat;

    use super::*;

    fn message(msg_id: u64, sender: Option<&str>) -> HistoryMessage {
        HistoryMessage {
            msg_id,
            time: 1_600_000_000 + msg_id as i64,
            wid: format!("w{msg_id}"),
            chat: sender.map(|s| MessageChat {
                sender: Some(s.to_string()),
                name: None,
            }),
            text: format!("text {msg_id}"),
            outgoing: false,
        }
    }

    fn page(chat_id: &str, ids: &[u64]) -> Payload {
        let page = HistoryPage {
            chat_id: chat_id.into(),
            messages: ids.iter().map(|&id| message(id, Some("alice"))).collect(),
        };
        Payload::from(serde_json::to_value(page).unwrap())
    }

    async fn chat(store: &MemoryStore, aim_id: &str) -> ChatRecord {
        let found = store.find(CHATS_COLLECTION, ChatRecord::filter(aim_id)).await.unwrap();
        assert_eq!(found.len(), 1, "expected exactly one chat document");
        serde_json::from_value(found[0].clone()).unwrap()
    }

    #[tokio::test]
    async fn parse_appends_to_existing_chat() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_one(CHATS_COLLECTION, serde_json::to_value(ChatRecord::new("Team", "c1")).unwrap())
            .await
            .unwrap();
        let hooks = StoreHooks::new(store.clone());

        hooks.parse_chat_messages(&page("c1", &[1, 2])).await.unwrap();
        hooks.parse_chat_messages(&page("c1", &[3])).await.unwrap();

        let chat = chat(&store, "c1").await;
        assert_eq!(chat.name, "Team");
        let ids: Vec<_> = chat.messages.iter().map(|m| m.msg_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(chat.messages[0].sender, "alice");
    }

    #[tokio::test]
    async fn pages_stored_out_of_order_stay_sorted() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_one(CHATS_COLLECTION, serde_json::to_value(ChatRecord::new("Team", "c1")).unwrap())
            .await
            .unwrap();
        let hooks = StoreHooks::new(store.clone());

        hooks.parse_chat_messages(&page("c1", &[4, 5])).await.unwrap();
        hooks.parse_chat_messages(&page("c1", &[1, 2, 3])).await.unwrap();

        let ids: Vec<_> = chat(&store, "c1").await.messages.iter().map(|m| m.msg_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn parse_creates_missing_chat() {
        let store = Arc::new(MemoryStore::new());
        let hooks = StoreHooks::new(store.clone());

        hooks.parse_chat_messages(&page("solo", &[10])).await.unwrap();

        let chat = chat(&store, "solo").await;
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].time.timestamp(), 1_600_000_010);
    }

    #[tokio::test]
    async fn parse_rejects_malformed_payload() {
        let hooks = StoreHooks::new(Arc::new(MemoryStore::new()));
        let err = hooks
            .parse_chat_messages(&Payload::from(json!({"nope": true})))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("history page"));
    }

    #[tokio::test]
    async fn save_inserts_each_message() {
        let store = Arc::new(MemoryStore::new());
        let hooks = StoreHooks::new(store.clone());
        let records: Vec<_> = (1..=2)
            .map(|id| {
                serde_json::to_value(ChatMessageRecord::from_unix(id, 0, "w", "bob", "hi").in_chat("c"))
                    .unwrap()
            })
            .collect();

        hooks.save_chat_message(&Payload::from(records)).await.unwrap();
        hooks
            .save_chat_message(&Payload::from(
                serde_json::to_value(ChatMessageRecord::from_unix(3, 0, "w", "bob", "hi")).unwrap(),
            ))
            .await
            .unwrap();

        assert_eq!(store.count(MESSAGES_COLLECTION).await, 3);
    }
}
