//! Publishing API abstraction
//!
//! This module defines the trait covering the slice of the publishing API the
//! pipeline drives: post creation, simple image upload, the chunked
//! initialize/append/finalize/status protocol for video, and the OAuth2
//! refresh-token grant. The HTTP implementation lives in [`http`], a fully
//! scriptable test double in [`mock`].

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::ProcessingState;

pub mod http;
pub mod mock;

/// Asynchronous processing status for uploaded media
#[derive(Debug, Clone)]
pub struct ProcessingInfo {
    pub state: ProcessingState,
    /// Provider-recommended delay before the next status check
    pub check_after_secs: Option<u64>,
}

/// Result of an OAuth2 refresh-token grant
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Providers may omit this; callers fall back to the old refresh token
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// The publishing API surface consumed by the pipeline.
///
/// Every method is a single network call; multi-step flows (chunked upload,
/// refresh-then-retry) are composed by the callers. Errors carry a typed
/// classification assigned at the HTTP boundary.
#[async_trait]
pub trait PublishingApi: Send + Sync {
    /// Submit a post. Returns the provider-assigned post id; a 2xx response
    /// without an id is an error, never silently accepted.
    async fn create_post(
        &self,
        access_token: &str,
        text: &str,
        media_ids: &[String],
    ) -> ApiResult<String>;

    /// One-shot multipart upload for images. Returns the media id.
    async fn upload_image(
        &self,
        access_token: &str,
        bytes: Vec<u8>,
        media_type: &str,
    ) -> ApiResult<String>;

    /// Declare a chunked upload session. Returns the session's media id.
    async fn initialize_upload(
        &self,
        access_token: &str,
        total_bytes: u64,
        media_type: &str,
        media_category: &str,
    ) -> ApiResult<String>;

    /// Upload one chunk, tagged with its zero-based segment index.
    async fn append_chunk(
        &self,
        access_token: &str,
        media_id: &str,
        chunk: Vec<u8>,
        segment_index: u32,
    ) -> ApiResult<()>;

    /// Signal completion of a chunked upload. `None` means the media is
    /// ready without asynchronous processing.
    async fn finalize_upload(
        &self,
        access_token: &str,
        media_id: &str,
    ) -> ApiResult<Option<ProcessingInfo>>;

    /// Query asynchronous processing status for a media id.
    async fn upload_status(&self, access_token: &str, media_id: &str)
        -> ApiResult<ProcessingInfo>;

    /// OAuth2 refresh-token grant.
    async fn refresh_token(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> ApiResult<TokenGrant>;
}
