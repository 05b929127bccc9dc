//! Featherpost - scheduled social-post auto-publication pipeline
//!
//! This library discovers due scheduled posts per account, resolves their
//! content from a shared pool, uploads attached media through the publishing
//! API's chunked/async-polling protocol, submits the post and records the
//! outcome. Completion and pool claims use the store's conditional writes so
//! concurrent worker invocations never double-post or double-consume.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod media;
pub mod pool;
pub mod publish;
pub mod scheduling;
pub mod time;
pub mod tokens;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use db::{CompletionOutcome, Database};
pub use error::{ApiError, ApiErrorKind, FeatherError, Result};
pub use events::{Event, EventBus};
pub use types::{Account, AccountCredential, PoolItem, PostStatus, ScheduledPost};
pub use worker::{AutoPostWorker, TickSummary};
