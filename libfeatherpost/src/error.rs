//! Error types for Featherpost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeatherError>;

#[derive(Error, Debug)]
pub enum FeatherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publishing API error: {0}")]
    Api(#[from] ApiError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FeatherError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FeatherError::InvalidInput(_) => 3,
            FeatherError::Api(e) if e.kind == ApiErrorKind::AuthExpired => 2,
            FeatherError::Api(_) => 1,
            FeatherError::Config(_) => 1,
            FeatherError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Classification of a publishing-API failure.
///
/// Set once, at the HTTP boundary, so downstream logic switches on a typed
/// classification instead of pattern-matching error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Connection-level failure; retryable on a later tick
    Network,
    /// 5xx from the provider; retryable on a later tick
    Server,
    /// 429; retryable after backoff
    RateLimited,
    /// 401: access token expired; triggers one refresh + one retry
    AuthExpired,
    /// 403: permanent for this reservation
    Forbidden,
    /// Provider rejected the post as duplicate content; permanent
    Duplicate,
    /// 2xx response without a post id; data inconsistency, never accepted
    NoPostId,
    /// Uploaded media reached a failed processing state
    MediaProcessing,
    /// Media processing exceeded the poll attempt/time ceiling
    MediaTimeout,
    /// Request was malformed or otherwise rejected (4xx)
    Invalid,
}

/// A publishing-API error carrying the provider status and a classification.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, None, message)
    }

    /// Transient failures: worth leaving the reservation retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::Network | ApiErrorKind::Server | ApiErrorKind::RateLimited
        )
    }

    /// Permanent failures: the reservation is flagged so future ticks skip it.
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Forbidden | ApiErrorKind::Duplicate)
    }

    pub fn is_auth_expired(&self) -> bool {
        self.kind == ApiErrorKind::AuthExpired
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
