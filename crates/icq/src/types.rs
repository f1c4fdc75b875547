//! Wire types for the `getHistory` and `getBuddyList` endpoints.
//!
//! Only the fields the dumper stores or logs are modelled; everything else
//! in the responses is ignored during deserialization.

use chatdump_core::types::MessageId;
use serde::{Deserialize, Serialize};

/// Patch version sent with every history request. `init` asks for the
/// history as stored, without incremental patches.
pub const HISTORY_PATCH_VERSION: &str = "init";

// ---------------------------------------------------------------------------
// getHistory
// ---------------------------------------------------------------------------

/// Body of a `POST /rapi` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    pub method: &'static str,
    pub req_id: String,
    pub aimsid: String,
    pub params: HistoryParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    /// Chat identifier.
    pub sn: String,
    pub from_msg_id: MessageId,
    pub count: u32,
    pub patch_version: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    #[serde(default)]
    pub ts: Option<u64>,
    #[serde(default)]
    pub status: Option<ResponseStatus>,
    #[serde(default)]
    pub req_id: Option<String>,
    #[serde(default)]
    pub results: Option<HistoryResults>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseStatus {
    pub code: i64,
}

/// One page of chat history.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResults {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
    #[serde(default)]
    pub last_msg_id: Option<MessageId>,
    #[serde(default)]
    pub patch_version: Option<String>,
    #[serde(default)]
    pub unread_cnt: Option<u64>,
    #[serde(default)]
    pub persons: Vec<Person>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub msg_id: MessageId,
    /// Unix seconds.
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub wid: String,
    #[serde(default)]
    pub chat: Option<MessageChat>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub outgoing: bool,
}

impl HistoryMessage {
    /// Sender of a group-chat message. Empty for one-to-one chats, where
    /// the API omits the `chat` object.
    pub fn sender(&self) -> &str {
        self.chat
            .as_ref()
            .and_then(|chat| chat.sender.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageChat {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub sn: String,
    #[serde(default)]
    pub friendly: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Cursor for the next history request: the id of the last message on the
/// page, or `None` when the page is empty and the chat is exhausted.
pub fn next_cursor(messages: &[HistoryMessage]) -> Option<MessageId> {
    messages.last().map(|message| message.msg_id)
}

// ---------------------------------------------------------------------------
// getBuddyList
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BuddyListResponse {
    pub response: BuddyListBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuddyListBody {
    pub status_code: u16,
    #[serde(default)]
    pub status_text: Option<String>,
    #[serde(default)]
    pub data: Option<BuddyListData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuddyListData {
    #[serde(default)]
    pub groups: Vec<BuddyGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuddyGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub buddies: Vec<Buddy>,
}

/// A contact or group chat the account can read.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buddy {
    pub aim_id: String,
    #[serde(default)]
    pub display_id: Option<String>,
    #[serde(default)]
    pub friendly: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
}

impl Buddy {
    /// Human-readable name, falling back to the chat id.
    pub fn display_name(&self) -> &str {
        self.friendly
            .as_deref()
            .or(self.display_id.as_deref())
            .unwrap_or(&self.aim_id)
    }
}

impl BuddyListResponse {
    /// Every buddy across all groups, in response order.
    pub fn into_buddies(self) -> Vec<Buddy> {
        self.response
            .data
            .unwrap_or_default()
            .groups
            .into_iter()
            .flat_map(|group| group.buddies)
            .collect()
    }
}
