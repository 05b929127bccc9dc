//! Media resolution and upload
//!
//! Converts a reservation's media references into provider-side media
//! handles. Images go through the one-shot multipart endpoint; video goes
//! through the chunked initialize/append/finalize protocol followed by a
//! bounded status-poll loop. A handle is returned only for media whose
//! processing state is explicitly succeeded.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::PublishingApi;
use crate::error::{ApiError, ApiErrorKind, ApiResult};
use crate::time::Sleeper;
use crate::types::{MediaKind, ProcessingState};

/// Fixed chunk size for the append phase
pub const CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// The publishing API accepts at most this many media per post
pub const MAX_MEDIA_PER_POST: usize = 4;

/// Attempt ceiling for the processing poll loop
pub const MAX_STATUS_POLLS: u32 = 30;

/// Wall-clock ceiling for the processing poll loop
pub const MAX_PROCESSING_WAIT: Duration = Duration::from_secs(300);

/// Poll delay used when the provider does not recommend one
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(5);

/// Blob lookup for media references.
///
/// Not-found is an ordinary outcome, not an error; the caller skips that
/// medium. `remove` is best-effort cleanup after a consumed post.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn fetch(&self, media_ref: &str) -> std::io::Result<Option<Vec<u8>>>;
    async fn remove(&self, media_ref: &str) -> std::io::Result<()>;
}

/// Filesystem-backed media store; references resolve relative to a root
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, media_ref: &str) -> PathBuf {
        let path = PathBuf::from(media_ref);
        if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn fetch(&self, media_ref: &str) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.resolve(media_ref)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, media_ref: &str) -> std::io::Result<()> {
        match tokio::fs::remove_file(self.resolve(media_ref)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory media store for tests and tooling
#[derive(Default)]
pub struct MemoryMediaStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, media_ref: &str, bytes: Vec<u8>) {
        self.blobs
            .lock()
            .unwrap()
            .insert(media_ref.to_string(), bytes);
    }

    pub fn contains(&self, media_ref: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(media_ref)
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn fetch(&self, media_ref: &str) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().unwrap().get(media_ref).cloned())
    }

    async fn remove(&self, media_ref: &str) -> std::io::Result<()> {
        self.blobs.lock().unwrap().remove(media_ref);
        Ok(())
    }
}

/// Drives media references through the publishing API's upload protocols
pub struct MediaUploader<'a> {
    api: &'a dyn PublishingApi,
    store: &'a dyn MediaStore,
    sleeper: &'a dyn Sleeper,
}

impl<'a> MediaUploader<'a> {
    pub fn new(api: &'a dyn PublishingApi, store: &'a dyn MediaStore, sleeper: &'a dyn Sleeper) -> Self {
        Self { api, store, sleeper }
    }

    /// Resolve and upload all references, returning the obtained handles.
    ///
    /// A failed or missing medium is skipped with a warning and does not
    /// abort the others; the caller decides what an empty result means.
    pub async fn upload_all(&self, access_token: &str, media_refs: &[String]) -> Vec<String> {
        let refs = if media_refs.len() > MAX_MEDIA_PER_POST {
            warn!(
                count = media_refs.len(),
                max = MAX_MEDIA_PER_POST,
                "too many media references, truncating"
            );
            &media_refs[..MAX_MEDIA_PER_POST]
        } else {
            media_refs
        };

        let mut media_ids = Vec::new();
        for media_ref in refs {
            match self.upload_one(access_token, media_ref).await {
                Ok(Some(id)) => media_ids.push(id),
                Ok(None) => warn!(media_ref, "media blob not found, skipping"),
                Err(e) => warn!(media_ref, error = %e, "media upload failed, skipping"),
            }
        }
        media_ids
    }

    async fn upload_one(&self, access_token: &str, media_ref: &str) -> ApiResult<Option<String>> {
        let bytes = match self.store.fetch(media_ref).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => {
                return Err(ApiError::network(format!(
                    "media fetch {}: {}",
                    media_ref, e
                )))
            }
        };

        let kind = MediaKind::from_ref(media_ref);
        let media_id = match kind {
            MediaKind::Image => {
                self.api
                    .upload_image(access_token, bytes, kind.mime_type(media_ref))
                    .await?
            }
            MediaKind::Video => self.upload_video(access_token, media_ref, bytes).await?,
        };

        Ok(Some(media_id))
    }

    /// The chunked upload state machine: initialize, append, finalize, poll.
    async fn upload_video(
        &self,
        access_token: &str,
        media_ref: &str,
        bytes: Vec<u8>,
    ) -> ApiResult<String> {
        let kind = MediaKind::Video;
        let media_id = self
            .api
            .initialize_upload(
                access_token,
                bytes.len() as u64,
                kind.mime_type(media_ref),
                kind.category(),
            )
            .await?;

        for (index, chunk) in bytes.chunks(CHUNK_SIZE).enumerate() {
            self.api
                .append_chunk(access_token, &media_id, chunk.to_vec(), index as u32)
                .await?;
        }

        let info = self.api.finalize_upload(access_token, &media_id).await?;
        let Some(info) = info else {
            // No processing phase declared: the media is ready
            return Ok(media_id);
        };

        match info.state {
            ProcessingState::Succeeded => return Ok(media_id),
            ProcessingState::Failed => {
                return Err(ApiError::new(
                    ApiErrorKind::MediaProcessing,
                    None,
                    format!("media {} failed processing at finalize", media_id),
                ))
            }
            _ => {}
        }

        self.poll_until_processed(access_token, &media_id, info.check_after_secs)
            .await
    }

    /// Bounded poll loop: sleeps the provider-recommended delay, then checks
    /// status, until succeeded, failed, or a ceiling is hit. Both an attempt
    /// ceiling and a wall-clock ceiling apply, whichever triggers first.
    async fn poll_until_processed(
        &self,
        access_token: &str,
        media_id: &str,
        check_after_secs: Option<u64>,
    ) -> ApiResult<String> {
        let mut next_delay = delay_from(check_after_secs);
        let mut waited = Duration::ZERO;

        for attempt in 0..MAX_STATUS_POLLS {
            if waited + next_delay > MAX_PROCESSING_WAIT {
                break;
            }

            self.sleeper.sleep(next_delay).await;
            waited += next_delay;

            match self.api.upload_status(access_token, media_id).await {
                Ok(info) => match info.state {
                    ProcessingState::Succeeded => return Ok(media_id.to_string()),
                    ProcessingState::Failed => {
                        return Err(ApiError::new(
                            ApiErrorKind::MediaProcessing,
                            None,
                            format!("media {} failed processing", media_id),
                        ))
                    }
                    // pending, in_progress and unrecognized states all keep
                    // polling; only an explicit succeeded yields a handle
                    state => {
                        debug!(media_id, attempt, ?state, "media still processing");
                        next_delay = delay_from(info.check_after_secs);
                    }
                },
                Err(e) if e.is_retryable() => {
                    debug!(media_id, attempt, error = %e, "status poll hiccup");
                    next_delay = DEFAULT_POLL_DELAY;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ApiError::new(
            ApiErrorKind::MediaTimeout,
            None,
            format!(
                "media {} did not finish processing within {} polls / {}s",
                media_id,
                MAX_STATUS_POLLS,
                MAX_PROCESSING_WAIT.as_secs()
            ),
        ))
    }
}

fn delay_from(check_after_secs: Option<u64>) -> Duration {
    check_after_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_POLL_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockPublishingApi;

    /// Sleeper that records requested durations without waiting
    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn recorded(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    fn store_with(entries: &[(&str, usize)]) -> MemoryMediaStore {
        let store = MemoryMediaStore::new();
        for (name, size) in entries {
            store.insert(name, vec![7u8; *size]);
        }
        store
    }

    #[tokio::test]
    async fn test_image_simple_upload() {
        let api = MockPublishingApi::new();
        let store = store_with(&[("photo.jpg", 1024)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &["photo.jpg".to_string()]).await;
        assert_eq!(ids, vec!["mock-media-1".to_string()]);
        assert_eq!(api.image_count(), 1);
        assert_eq!(api.init_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_blob_is_skipped() {
        let api = MockPublishingApi::new();
        let store = store_with(&[("photo.jpg", 10)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader
            .upload_all("token", &["gone.jpg".to_string(), "photo.jpg".to_string()])
            .await;
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_image_skips_only_that_medium() {
        let api = MockPublishingApi::new().fail_next_image(ApiErrorKind::Server, "boom");
        let store = store_with(&[("a.jpg", 10), ("b.jpg", 10)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader
            .upload_all("token", &["a.jpg".to_string(), "b.jpg".to_string()])
            .await;
        assert_eq!(ids.len(), 1);
        assert_eq!(api.image_count(), 2);
    }

    #[tokio::test]
    async fn test_media_list_truncated_to_provider_limit() {
        let api = MockPublishingApi::new();
        let refs: Vec<String> = (0..6).map(|i| format!("img{}.jpg", i)).collect();
        let store = MemoryMediaStore::new();
        for r in &refs {
            store.insert(r, vec![1; 8]);
        }
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &refs).await;
        assert_eq!(ids.len(), MAX_MEDIA_PER_POST);
    }

    #[tokio::test]
    async fn test_video_chunking_segments() {
        let api = MockPublishingApi::new()
            .with_finalize_info(ProcessingState::Succeeded, None);
        // 12 MiB payload: chunks of 5, 5, 2 MiB with zero-based indices
        let store = store_with(&[("clip.mp4", 12 * 1024 * 1024)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &["clip.mp4".to_string()]).await;
        assert_eq!(ids.len(), 1);

        let chunks = api.chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].segment_index, 0);
        assert_eq!(chunks[0].len, CHUNK_SIZE);
        assert_eq!(chunks[1].segment_index, 1);
        assert_eq!(chunks[2].segment_index, 2);
        assert_eq!(chunks[2].len, 2 * 1024 * 1024);
        assert_eq!(api.status_count(), 0);
    }

    #[tokio::test]
    async fn test_video_finalize_without_processing_info_is_ready() {
        let api = MockPublishingApi::new();
        let store = store_with(&[("clip.mp4", 1024)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &["clip.mp4".to_string()]).await;
        assert_eq!(ids.len(), 1);
        assert_eq!(api.status_count(), 0);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_video_poll_waits_recommended_delay_then_succeeds() {
        let api = MockPublishingApi::new()
            .with_finalize_info(ProcessingState::InProgress, Some(2))
            .queue_status(ProcessingState::Succeeded, None);
        let store = store_with(&[("clip.mp4", 1024)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &["clip.mp4".to_string()]).await;
        assert_eq!(ids.len(), 1);

        // The first status check happens only after the recommended delay
        let sleeps = sleeper.recorded();
        assert_eq!(sleeps.len(), 1);
        assert!(sleeps[0] >= Duration::from_secs(2));
        assert_eq!(api.status_count(), 1);
    }

    #[tokio::test]
    async fn test_video_poll_bounded_when_never_terminal() {
        let api = MockPublishingApi::new()
            .with_finalize_info(ProcessingState::Pending, Some(1))
            .with_status_default(ProcessingState::InProgress, Some(1));
        let store = store_with(&[("clip.mp4", 1024)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &["clip.mp4".to_string()]).await;
        assert!(ids.is_empty());
        // Terminated by the attempt ceiling, not an endless loop
        assert_eq!(api.status_count() as u32, MAX_STATUS_POLLS);
    }

    #[tokio::test]
    async fn test_video_poll_wall_clock_ceiling() {
        // Recommended delays so large that the wall-clock ceiling trips
        // before the attempt ceiling
        let api = MockPublishingApi::new()
            .with_finalize_info(ProcessingState::InProgress, Some(120))
            .with_status_default(ProcessingState::InProgress, Some(120));
        let store = store_with(&[("clip.mp4", 1024)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &["clip.mp4".to_string()]).await;
        assert!(ids.is_empty());

        let total: Duration = sleeper.recorded().iter().sum();
        assert!(total <= MAX_PROCESSING_WAIT);
        assert!(api.status_count() < MAX_STATUS_POLLS as usize);
    }

    #[tokio::test]
    async fn test_video_failed_processing_is_decisive() {
        let api = MockPublishingApi::new()
            .with_finalize_info(ProcessingState::InProgress, Some(1))
            .queue_status(ProcessingState::Failed, None);
        let store = store_with(&[("clip.mp4", 1024)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &["clip.mp4".to_string()]).await;
        assert!(ids.is_empty());
        assert_eq!(api.status_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_processing_state_never_yields_handle() {
        let api = MockPublishingApi::new()
            .with_finalize_info(ProcessingState::InProgress, Some(1))
            .queue_status(ProcessingState::Other("transcoding".into()), Some(1))
            .queue_status(ProcessingState::Succeeded, None);
        let store = store_with(&[("clip.mp4", 1024)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &["clip.mp4".to_string()]).await;
        // The unknown state kept polling; the handle arrived only with the
        // explicit succeeded
        assert_eq!(ids.len(), 1);
        assert_eq!(api.status_count(), 2);
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_video() {
        let api = MockPublishingApi::new().fail_chunk(1, "append failed");
        let store = store_with(&[("clip.mp4", 12 * 1024 * 1024)]);
        let sleeper = RecordingSleeper::default();
        let uploader = MediaUploader::new(&api, &store, &sleeper);

        let ids = uploader.upload_all("token", &["clip.mp4".to_string()]).await;
        assert!(ids.is_empty());
        assert_eq!(api.finalize_count(), 0);
    }

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pic.jpg"), b"bytes").unwrap();

        let store = FsMediaStore::new(dir.path());
        let bytes = store.fetch("pic.jpg").await.unwrap().unwrap();
        assert_eq!(bytes, b"bytes");

        assert!(store.fetch("missing.jpg").await.unwrap().is_none());

        store.remove("pic.jpg").await.unwrap();
        assert!(store.fetch("pic.jpg").await.unwrap().is_none());
        // Removing an already-missing blob is not an error
        store.remove("pic.jpg").await.unwrap();
    }
}
