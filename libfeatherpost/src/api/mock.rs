//! Mock publishing API for testing
//!
//! A configurable test double that records every call and can be scripted
//! with failure and processing-state sequences. Available for all builds so
//! integration tests can drive the full pipeline without network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{ApiError, ApiErrorKind, ApiResult};
use crate::types::ProcessingState;

use super::{ProcessingInfo, PublishingApi, TokenGrant};

/// A post captured by the mock
#[derive(Debug, Clone)]
pub struct CapturedPost {
    pub access_token: String,
    pub text: String,
    pub media_ids: Vec<String>,
}

/// A chunk captured by the mock
#[derive(Debug, Clone)]
pub struct CapturedChunk {
    pub media_id: String,
    pub len: usize,
    pub segment_index: u32,
}

#[derive(Default)]
struct MockState {
    posts: Vec<CapturedPost>,
    chunks: Vec<CapturedChunk>,
    post_failures: VecDeque<ApiError>,
    image_failures: VecDeque<ApiError>,
    init_failure: Option<ApiError>,
    chunk_failures: VecDeque<(u32, ApiError)>,
    finalize_info: Option<ProcessingInfo>,
    status_sequence: VecDeque<ProcessingInfo>,
    status_default: Option<ProcessingInfo>,
    refresh_failure: Option<ApiError>,
    valid_token: Option<String>,
    refresh_grant: Option<TokenGrant>,
    post_count: usize,
    image_count: usize,
    init_count: usize,
    finalize_count: usize,
    status_count: usize,
    refresh_count: usize,
    media_seq: usize,
    post_seq: usize,
}

/// Scriptable mock implementation of [`PublishingApi`]
#[derive(Clone, Default)]
pub struct MockPublishingApi {
    state: Arc<Mutex<MockState>>,
}

impl MockPublishingApi {
    /// A mock where every call succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Only `token` is accepted by `create_post`; other tokens fail with an
    /// auth-expired classification. `refresh_token` hands out `token`.
    pub fn with_valid_token(self, token: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.valid_token = Some(token.to_string());
            state.refresh_grant = Some(TokenGrant {
                access_token: token.to_string(),
                refresh_token: Some(format!("{}-refresh", token)),
                expires_in: Some(7200),
            });
        }
        self
    }

    /// Fail the next `create_post` call with the given classification
    pub fn fail_next_post(self, kind: ApiErrorKind, status: Option<u16>, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .post_failures
            .push_back(ApiError::new(kind, status, message));
        self
    }

    /// Fail the next `upload_image` call
    pub fn fail_next_image(self, kind: ApiErrorKind, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .image_failures
            .push_back(ApiError::new(kind, None, message));
        self
    }

    /// Fail `initialize_upload`
    pub fn fail_initialize(self, kind: ApiErrorKind, message: &str) -> Self {
        self.state.lock().unwrap().init_failure = Some(ApiError::new(kind, None, message));
        self
    }

    /// Fail the append carrying the given segment index
    pub fn fail_chunk(self, segment_index: u32, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .chunk_failures
            .push_back((segment_index, ApiError::new(ApiErrorKind::Server, Some(500), message)));
        self
    }

    /// Processing info returned by `finalize_upload` (None = ready at once)
    pub fn with_finalize_info(self, state: ProcessingState, check_after_secs: Option<u64>) -> Self {
        self.state.lock().unwrap().finalize_info = Some(ProcessingInfo {
            state,
            check_after_secs,
        });
        self
    }

    /// Queue one `upload_status` response
    pub fn queue_status(self, state: ProcessingState, check_after_secs: Option<u64>) -> Self {
        self.state.lock().unwrap().status_sequence.push_back(ProcessingInfo {
            state,
            check_after_secs,
        });
        self
    }

    /// `upload_status` response once the queue is drained
    pub fn with_status_default(self, state: ProcessingState, check_after_secs: Option<u64>) -> Self {
        self.state.lock().unwrap().status_default = Some(ProcessingInfo {
            state,
            check_after_secs,
        });
        self
    }

    /// Fail `refresh_token`
    pub fn fail_refresh(self, message: &str) -> Self {
        self.state.lock().unwrap().refresh_failure =
            Some(ApiError::new(ApiErrorKind::Invalid, Some(400), message));
        self
    }

    pub fn posts(&self) -> Vec<CapturedPost> {
        self.state.lock().unwrap().posts.clone()
    }

    pub fn chunks(&self) -> Vec<CapturedChunk> {
        self.state.lock().unwrap().chunks.clone()
    }

    pub fn post_count(&self) -> usize {
        self.state.lock().unwrap().post_count
    }

    pub fn image_count(&self) -> usize {
        self.state.lock().unwrap().image_count
    }

    pub fn init_count(&self) -> usize {
        self.state.lock().unwrap().init_count
    }

    pub fn finalize_count(&self) -> usize {
        self.state.lock().unwrap().finalize_count
    }

    pub fn status_count(&self) -> usize {
        self.state.lock().unwrap().status_count
    }

    pub fn refresh_count(&self) -> usize {
        self.state.lock().unwrap().refresh_count
    }
}

#[async_trait]
impl PublishingApi for MockPublishingApi {
    async fn create_post(
        &self,
        access_token: &str,
        text: &str,
        media_ids: &[String],
    ) -> ApiResult<String> {
        let mut state = self.state.lock().unwrap();
        state.post_count += 1;

        if let Some(error) = state.post_failures.pop_front() {
            return Err(error);
        }

        if let Some(valid) = &state.valid_token {
            if access_token != valid {
                return Err(ApiError::new(
                    ApiErrorKind::AuthExpired,
                    Some(401),
                    "mock: access token rejected",
                ));
            }
        }

        state.posts.push(CapturedPost {
            access_token: access_token.to_string(),
            text: text.to_string(),
            media_ids: media_ids.to_vec(),
        });
        state.post_seq += 1;
        Ok(format!("mock-post-{}", state.post_seq))
    }

    async fn upload_image(
        &self,
        _access_token: &str,
        _bytes: Vec<u8>,
        _media_type: &str,
    ) -> ApiResult<String> {
        let mut state = self.state.lock().unwrap();
        state.image_count += 1;

        if let Some(error) = state.image_failures.pop_front() {
            return Err(error);
        }

        state.media_seq += 1;
        Ok(format!("mock-media-{}", state.media_seq))
    }

    async fn initialize_upload(
        &self,
        _access_token: &str,
        _total_bytes: u64,
        _media_type: &str,
        _media_category: &str,
    ) -> ApiResult<String> {
        let mut state = self.state.lock().unwrap();
        state.init_count += 1;

        if let Some(error) = state.init_failure.take() {
            return Err(error);
        }

        state.media_seq += 1;
        Ok(format!("mock-media-{}", state.media_seq))
    }

    async fn append_chunk(
        &self,
        _access_token: &str,
        media_id: &str,
        chunk: Vec<u8>,
        segment_index: u32,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();

        if let Some(pos) = state
            .chunk_failures
            .iter()
            .position(|(segment, _)| *segment == segment_index)
        {
            let (_, error) = state.chunk_failures.remove(pos).expect("position exists");
            return Err(error);
        }

        state.chunks.push(CapturedChunk {
            media_id: media_id.to_string(),
            len: chunk.len(),
            segment_index,
        });
        Ok(())
    }

    async fn finalize_upload(
        &self,
        _access_token: &str,
        _media_id: &str,
    ) -> ApiResult<Option<ProcessingInfo>> {
        let mut state = self.state.lock().unwrap();
        state.finalize_count += 1;
        Ok(state.finalize_info.clone())
    }

    async fn upload_status(
        &self,
        _access_token: &str,
        _media_id: &str,
    ) -> ApiResult<ProcessingInfo> {
        let mut state = self.state.lock().unwrap();
        state.status_count += 1;

        if let Some(info) = state.status_sequence.pop_front() {
            return Ok(info);
        }
        if let Some(info) = state.status_default.clone() {
            return Ok(info);
        }
        Ok(ProcessingInfo {
            state: ProcessingState::Succeeded,
            check_after_secs: None,
        })
    }

    async fn refresh_token(
        &self,
        _client_id: &str,
        _client_secret: &str,
        refresh_token: &str,
    ) -> ApiResult<TokenGrant> {
        let mut state = self.state.lock().unwrap();
        state.refresh_count += 1;

        if let Some(error) = state.refresh_failure.clone() {
            return Err(error);
        }

        if let Some(grant) = state.refresh_grant.clone() {
            return Ok(grant);
        }

        Ok(TokenGrant {
            access_token: format!("{}-rotated", refresh_token),
            refresh_token: Some(format!("{}-next", refresh_token)),
            expires_in: Some(7200),
        })
    }
}
