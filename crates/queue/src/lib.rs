//! Bounded, retrying worker-pool job dispatcher.
//!
//! Decouples producers of work from the workers that execute it:
//!
//! - [`Job`]: a unit of work with its payload, action and retry bookkeeping.
//! - [`Dispatcher`]: owns the bounded submission queue and the worker
//!   pool, hands jobs off to idle workers and applies the [`RetryPolicy`]
//!   to failures reported by workers.
//! - [`DispatcherHandle`]: the cloneable producer side, for submission and
//!   shutdown.
//! - [`ActionHooks`]: the seam through which workers call into the
//!   persistence layer for the built-in chat actions.
//!
//! Every cross-task interaction goes through a bounded `tokio::sync::mpsc`
//! channel or a `CancellationToken`; there is no shared mutable state.

pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod job;
pub mod retry;

mod pool;
mod worker;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle};
pub use error::DispatchError;
pub use hooks::{ActionHooks, NoopHooks};
pub use job::{Job, JobAction, JobError, JobFn, JobOutcome, JobStatus, Payload};
pub use retry::RetryPolicy;
