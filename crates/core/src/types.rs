/// Remote chat identifier (the `sn` / `aimId` of a chat or buddy).
pub type ChatId = String;

/// Server-assigned message id. Ids grow monotonically within a chat.
pub type MessageId = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Message id the history walk starts from.
pub const FIRST_MESSAGE_ID: MessageId = 1;
