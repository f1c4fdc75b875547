//! Client for the ICQ bot API.
//!
//! Fetches the buddy list and pages of chat history over HTTP, and exposes
//! the wire types the dumper turns into stored records.

pub mod api;
pub mod types;

pub use api::{IcqApi, IcqApiError, DEFAULT_API_URL};
pub use types::{next_cursor, Buddy, BuddyGroup, HistoryMessage, HistoryResults};
