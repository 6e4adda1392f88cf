//! SQLite persistence for conversations, skills, tasks, work items,
//! and settings.
//!
//! The store wraps a single connection in a `Mutex`; SQLite serializes
//! writers anyway and the queries here are short. Transient failures
//! (busy/locked) are retried inside the adapter with exponential
//! backoff; permanent failures (data shape) surface immediately.

pub mod db;
pub mod encryption;
pub mod error;
pub mod store;

pub use encryption::SecretCipher;
pub use error::{Result, StoreError};
pub use store::{
    Conversation, MessageRow, SkillRow, Store, SummaryRow, TaskRow, UsageTotals, WorkItemRow,
};
