//! Core types for Featherpost

use serde::{Deserialize, Serialize};

/// Status state machine for a scheduled-post reservation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PostStatus {
    /// Waiting for its slot; content may still be empty
    Scheduled,
    /// Legacy "not yet finalized" marker; due-eligible like Scheduled
    PendingQuote,
    /// Terminal: published and recorded
    Posted,
    /// Terminal: the posting window passed before publication
    Expired,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::PendingQuote => "pending_quote",
            Self::Posted => "posted",
            Self::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending_quote" => Self::PendingQuote,
            "posted" => Self::Posted,
            "expired" => Self::Expired,
            _ => Self::Scheduled,
        }
    }

    /// Whether a reservation in this status may still be posted
    pub fn is_due_eligible(&self) -> bool {
        matches!(self, Self::Scheduled | Self::PendingQuote)
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One reservation: an intended publish action for an account in a time slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub account_id: String,
    /// Date + time-window key, unique within an account (e.g. "2026-08-06#17:00-21:00")
    pub slot_key: String,
    pub content: String,
    /// Ordered media references, resolved via the media store
    pub images: Vec<String>,
    pub scheduled_at: i64,
    /// Textual posting window such as "17:00-21:00"; None = no window
    pub time_range: Option<String>,
    pub status: PostStatus,
    pub posted_at: Option<i64>,
    pub post_id: Option<String>,
    pub post_url: Option<String>,
    pub permanent_failure: bool,
    pub last_post_error: Option<String>,
}

impl ScheduledPost {
    /// A fresh reservation in the scheduled state with possibly-empty content
    pub fn new(account_id: String, slot_key: String, scheduled_at: i64) -> Self {
        Self {
            account_id,
            slot_key,
            content: String::new(),
            images: Vec::new(),
            scheduled_at,
            time_range: None,
            status: PostStatus::Scheduled,
            posted_at: None,
            post_id: None,
            post_url: None,
            permanent_failure: false,
            last_post_error: None,
        }
    }

    pub fn needs_content(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// An unpublished content item in the shared pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolItem {
    pub user_id: String,
    pub pool_id: String,
    /// Content category; must match the consuming account's category
    pub item_type: String,
    pub content: String,
    pub images: Vec<String>,
    pub created_at: i64,
}

impl PoolItem {
    /// A fresh pool item with a generated id
    pub fn new(user_id: String, item_type: String, content: String, images: Vec<String>) -> Self {
        Self {
            user_id,
            pool_id: uuid::Uuid::new_v4().to_string(),
            item_type,
            content,
            images,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A social account eligible for auto-posting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub user_id: String,
    pub category: String,
    /// true = reuse mode (non-destructive pool reads), false = consume mode
    pub reuse_pool: bool,
    pub active: bool,
    pub created_at: i64,
}

/// OAuth credentials for one account
#[derive(Debug, Clone)]
pub struct AccountCredential {
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch seconds; 0 = unknown
    pub token_expires_at: i64,
    pub client_id: String,
    pub client_secret: String,
}

impl AccountCredential {
    /// Whether the access token is within `threshold_secs` of expiring.
    /// An unknown expiry (0) is never treated as near-expiry.
    pub fn expires_within(&self, now: i64, threshold_secs: i64) -> bool {
        self.token_expires_at > 0 && self.token_expires_at - now <= threshold_secs
    }
}

/// Media kind, detected from the reference's file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_ref(media_ref: &str) -> Self {
        let ext = media_ref.rsplit('.').next().unwrap_or("").to_lowercase();
        match ext.as_str() {
            "mp4" | "mov" | "m4v" | "webm" => Self::Video,
            _ => Self::Image,
        }
    }

    pub fn mime_type(&self, media_ref: &str) -> &'static str {
        match self {
            Self::Video => "video/mp4",
            Self::Image => {
                let ext = media_ref.rsplit('.').next().unwrap_or("").to_lowercase();
                match ext.as_str() {
                    "png" => "image/png",
                    "gif" => "image/gif",
                    "webp" => "image/webp",
                    _ => "image/jpeg",
                }
            }
        }
    }

    /// Media category declared to the upload endpoints
    pub fn category(&self) -> &'static str {
        match self {
            Self::Image => "tweet_image",
            Self::Video => "tweet_video",
        }
    }
}

/// Asynchronous processing state reported for uploaded video
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    /// Anything the provider reports that we do not recognize.
    /// Never treated as success.
    Other(String),
}

impl ProcessingState {
    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}
