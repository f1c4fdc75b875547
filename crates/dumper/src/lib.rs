//! Chat history dumper.
//!
//! Walks the history of one chat (or every chat in the buddy list) through
//! the ICQ API and persists it through a job dispatcher, so slow or flaky
//! writes are retried without stalling the walk.

pub mod app;
pub mod config;
pub mod hooks;
pub mod producer;

pub use app::{run, run_with, shutdown_signal};
pub use config::{ChatSelection, ConfigError, DumperConfig};
pub use hooks::{HistoryPage, StoreHooks};
pub use producer::{DumpSummary, HistoryProducer, HistorySource, ProducerError};
