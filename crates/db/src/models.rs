//! Stored chat records.

use chatdump_core::types::{MessageId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Collection holding one document per chat, with its messages embedded.
pub const CHATS_COLLECTION: &str = "chats";

/// Collection holding individually saved messages.
pub const MESSAGES_COLLECTION: &str = "messages";

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A document in the `chats` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub name: String,
    pub aim_id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessageRecord>,
}

impl ChatRecord {
    pub fn new(name: impl Into<String>, aim_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aim_id: aim_id.into(),
            messages: Vec::new(),
        }
    }

    /// Filter selecting the chat document for `aim_id`.
    pub fn filter(aim_id: &str) -> Value {
        json!({ "aimId": aim_id })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One chat message as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRecord {
    pub msg_id: MessageId,
    pub time: Timestamp,
    pub wid: String,
    pub sender: String,
    pub text: String,
    /// Chat the message belongs to. Omitted when embedded in its chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aim_id: Option<String>,
}

impl ChatMessageRecord {
    /// Build a record from a Unix-seconds timestamp. Out-of-range times fall
    /// back to the epoch.
    pub fn from_unix(
        msg_id: MessageId,
        unix_seconds: i64,
        wid: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            msg_id,
            time: chrono::DateTime::from_timestamp(unix_seconds, 0).unwrap_or_default(),
            wid: wid.into(),
            sender: sender.into(),
            text: text.into(),
            aim_id: None,
        }
    }

    pub fn in_chat(mut self, aim_id: impl Into<String>) -> Self {
        self.aim_id = Some(aim_id.into());
        self
    }
}
