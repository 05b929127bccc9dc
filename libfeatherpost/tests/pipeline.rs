//! End-to-end pipeline tests against the mock publishing API
//!
//! These exercise the full fetch → claim → upload → post → record flow,
//! including the concurrency properties the conditional writes guarantee.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libfeatherpost::api::mock::MockPublishingApi;
use libfeatherpost::config::WorkerConfig;
use libfeatherpost::events::EventBus;
use libfeatherpost::media::{MemoryMediaStore, CHUNK_SIZE};
use libfeatherpost::time::{Clock, Sleeper};
use libfeatherpost::types::{Account, AccountCredential, PoolItem, PostStatus, ScheduledPost};
use libfeatherpost::{AutoPostWorker, Database};

struct FixedClock(i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}

struct NoopSleeper;

#[async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

const NOW: i64 = 1_754_400_000;

fn make_worker(
    db: &Database,
    api: &MockPublishingApi,
    store: Arc<MemoryMediaStore>,
) -> AutoPostWorker {
    AutoPostWorker::new(
        db.clone(),
        Arc::new(api.clone()),
        store,
        Arc::new(NoopSleeper),
        Arc::new(FixedClock(NOW)),
        EventBus::new(100),
        WorkerConfig::default(),
    )
}

async fn seed_account(db: &Database, account_id: &str, reuse: bool, access_token: &str) -> Account {
    let account = Account {
        account_id: account_id.to_string(),
        user_id: "user1".to_string(),
        category: "general".to_string(),
        reuse_pool: reuse,
        active: true,
        created_at: 0,
    };
    db.create_account(&account).await.unwrap();
    db.upsert_credential(
        &AccountCredential {
            account_id: account_id.to_string(),
            access_token: access_token.to_string(),
            refresh_token: "rt".to_string(),
            token_expires_at: 0,
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
        },
        0,
    )
    .await
    .unwrap();
    account
}

fn pool_item(pool_id: &str, content: &str, images: Vec<String>) -> PoolItem {
    PoolItem {
        user_id: "user1".to_string(),
        pool_id: pool_id.to_string(),
        item_type: "general".to_string(),
        content: content.to_string(),
        images,
        created_at: 0,
    }
}

#[tokio::test]
async fn end_to_end_consume_mode_scenario() {
    let db = Database::new(":memory:").await.unwrap();
    let api = MockPublishingApi::new();
    let store = Arc::new(MemoryMediaStore::new());
    seed_account(&db, "acc1", false, "at").await;

    // Empty reservation due 10s ago with an all-day window, plus one
    // claimable pool item
    let mut reservation = ScheduledPost::new("acc1".into(), "slot1".into(), NOW - 10);
    reservation.time_range = Some("00:00-23:59".to_string());
    db.create_reservation(&reservation).await.unwrap();
    db.create_pool_item(&pool_item("p1", "hello world", vec![]))
        .await
        .unwrap();

    let worker = make_worker(&db, &api, store);
    let summary = worker.run_tick().await.unwrap();
    assert_eq!(summary.total_posted(), 1);

    // The pool item is gone and the reservation is durably completed
    assert!(db
        .list_pool_items("user1", "general", 10)
        .await
        .unwrap()
        .is_empty());

    let stored = db.get_reservation("acc1", "slot1").await.unwrap().unwrap();
    assert_eq!(stored.content, "hello world");
    assert_eq!(stored.status, PostStatus::Posted);
    assert_eq!(stored.post_id.as_deref(), Some("mock-post-1"));
    assert!(stored.post_url.as_deref().unwrap().ends_with("mock-post-1"));

    let posts = api.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].text, "hello world");
}

#[tokio::test]
async fn at_most_once_posting_under_concurrent_workers() {
    let db = Database::new(":memory:").await.unwrap();
    let api = MockPublishingApi::new();
    seed_account(&db, "acc1", false, "at").await;

    let mut reservation = ScheduledPost::new("acc1".into(), "slot1".into(), NOW - 10);
    reservation.content = "only once".to_string();
    db.create_reservation(&reservation).await.unwrap();

    // Two worker instances over the same store, racing on the same account
    let worker_a = make_worker(&db, &api, Arc::new(MemoryMediaStore::new()));
    let worker_b = make_worker(&db, &api, Arc::new(MemoryMediaStore::new()));

    let (a, b) = tokio::join!(worker_a.run_tick(), worker_b.run_tick());
    let posted = a.unwrap().total_posted() + b.unwrap().total_posted();

    // The provider may see more than one call (at-least-once invocation),
    // but exactly one completion is ever recorded
    assert_eq!(posted, 1);

    let stored = db.get_reservation("acc1", "slot1").await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Posted);
    let post_id = stored.post_id.unwrap();
    assert!(post_id.starts_with("mock-post-"));

    // And the recorded id belongs to a call that actually happened
    assert!(api.post_count() >= 1);
}

#[tokio::test]
async fn exclusive_pool_consumption_across_accounts() {
    let db = Database::new(":memory:").await.unwrap();
    let api = MockPublishingApi::new();
    let store = Arc::new(MemoryMediaStore::new());

    // Two consume-mode accounts share the same user's pool; one item exists
    seed_account(&db, "acc1", false, "at").await;
    seed_account(&db, "acc2", false, "at").await;
    db.create_reservation(&ScheduledPost::new("acc1".into(), "slot1".into(), NOW - 10))
        .await
        .unwrap();
    db.create_reservation(&ScheduledPost::new("acc2".into(), "slot1".into(), NOW - 10))
        .await
        .unwrap();
    db.create_pool_item(&pool_item("p1", "the only item", vec![]))
        .await
        .unwrap();

    let worker = make_worker(&db, &api, store);
    let summary = worker.run_tick().await.unwrap();

    // Exactly one account claimed the item and posted; the loser skipped
    // without error
    assert_eq!(summary.total_posted(), 1);
    assert!(summary.failed_accounts.is_empty());
    let skipped: usize = summary.reports.iter().map(|r| r.skipped).sum();
    assert_eq!(skipped, 1);
    assert_eq!(api.posts().len(), 1);
    assert_eq!(api.posts()[0].text, "the only item");
}

#[tokio::test]
async fn auth_expiry_refreshes_once_and_retries() {
    let db = Database::new(":memory:").await.unwrap();
    let api = MockPublishingApi::new().with_valid_token("fresh");
    let store = Arc::new(MemoryMediaStore::new());
    seed_account(&db, "acc1", false, "stale").await;

    let mut reservation = ScheduledPost::new("acc1".into(), "slot1".into(), NOW - 10);
    reservation.content = "needs fresh token".to_string();
    db.create_reservation(&reservation).await.unwrap();

    let worker = make_worker(&db, &api, store);
    let summary = worker.run_tick().await.unwrap();

    assert_eq!(summary.total_posted(), 1);
    assert_eq!(api.refresh_count(), 1);
    assert_eq!(api.post_count(), 2);

    // The rotated pair is what future ticks will read
    let cred = db.get_credential("acc1").await.unwrap().unwrap();
    assert_eq!(cred.access_token, "fresh");
}

#[tokio::test]
async fn video_reservation_goes_through_chunked_upload() {
    let db = Database::new(":memory:").await.unwrap();
    let api = MockPublishingApi::new()
        .with_finalize_info(libfeatherpost::types::ProcessingState::InProgress, Some(1))
        .queue_status(libfeatherpost::types::ProcessingState::Succeeded, None);
    let store = Arc::new(MemoryMediaStore::new());
    store.insert("clips/launch.mp4", vec![9u8; CHUNK_SIZE + 1024]);

    seed_account(&db, "acc1", false, "at").await;
    let mut reservation = ScheduledPost::new("acc1".into(), "slot1".into(), NOW - 10);
    reservation.content = "watch this".to_string();
    reservation.images = vec!["clips/launch.mp4".to_string()];
    db.create_reservation(&reservation).await.unwrap();

    let worker = make_worker(&db, &api, store);
    let summary = worker.run_tick().await.unwrap();
    assert_eq!(summary.total_posted(), 1);

    // Two chunks with zero-based segment indices, then a post carrying the
    // processed handle
    let chunks = api.chunks();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].segment_index, 0);
    assert_eq!(chunks[1].segment_index, 1);

    let posts = api.posts();
    assert_eq!(posts[0].media_ids.len(), 1);
}

#[tokio::test]
async fn permanently_failed_reservation_is_not_retried_next_tick() {
    let db = Database::new(":memory:").await.unwrap();
    let api = MockPublishingApi::new().fail_next_post(
        libfeatherpost::ApiErrorKind::Forbidden,
        Some(403),
        "Forbidden",
    );
    let store = Arc::new(MemoryMediaStore::new());
    seed_account(&db, "acc1", false, "at").await;

    let mut reservation = ScheduledPost::new("acc1".into(), "slot1".into(), NOW - 10);
    reservation.content = "doomed".to_string();
    db.create_reservation(&reservation).await.unwrap();

    let worker = make_worker(&db, &api, store);
    let first = worker.run_tick().await.unwrap();
    assert_eq!(first.total_posted(), 0);

    // The next tick must not attempt the flagged reservation again
    let second = worker.run_tick().await.unwrap();
    assert_eq!(second.total_posted(), 0);
    assert_eq!(second.reports[0].considered, 0);
    assert_eq!(api.post_count(), 1);
}
