//! Persistence hooks for the built-in chat actions.
//!
//! Workers call these synchronously for [`JobAction::ParseChatMessages`]
//! and [`JobAction::SaveChatMessage`] jobs. An `Err` is treated exactly
//! like a failing custom function.
//!
//! [`JobAction::ParseChatMessages`]: crate::JobAction::ParseChatMessages
//! [`JobAction::SaveChatMessage`]: crate::JobAction::SaveChatMessage

use async_trait::async_trait;

use crate::job::Payload;

/// Implemented by the persistence collaborator and injected into the
/// dispatcher with [`Dispatcher::with_hooks`](crate::Dispatcher::with_hooks).
#[async_trait]
pub trait ActionHooks: Send + Sync {
    /// Turn a fetched page of chat history into stored messages.
    async fn parse_chat_messages(&self, payload: &Payload) -> anyhow::Result<()>;

    /// Persist a single chat message.
    async fn save_chat_message(&self, payload: &Payload) -> anyhow::Result<()>;
}

/// Hooks that accept every job without doing anything.
///
/// The default for a dispatcher that only runs custom-function jobs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl ActionHooks for NoopHooks {
    async fn parse_chat_messages(&self, payload: &Payload) -> anyhow::Result<()> {
        tracing::debug!(values = payload.len(), "No hook for parse_chat_messages, skipping");
        Ok(())
    }

    async fn save_chat_message(&self, payload: &Payload) -> anyhow::Result<()> {
        tracing::debug!(values = payload.len(), "No hook for save_chat_message, skipping");
        Ok(())
    }
}
