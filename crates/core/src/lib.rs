//! Shared types, errors and validation helpers for the chatdump workspace.
//!
//! Kept free of internal dependencies so every other crate can depend on it.

pub mod error;
pub mod types;
pub mod validation;

pub use error::CoreError;
