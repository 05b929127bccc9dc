//! Auto-post worker
//!
//! The per-tick orchestrator: for each active account, fetch due
//! reservations, expire those whose posting window has passed, resolve
//! missing content from the pool, upload media, submit the post and record
//! completion. Accounts are processed independently and concurrently; within
//! one account the steps run strictly in order.
//!
//! Per-reservation failures are recorded and never abort sibling
//! reservations or sibling accounts. A store failure during the initial
//! fetch is fatal for that account's tick and propagates.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::PublishingApi;
use crate::config::WorkerConfig;
use crate::db::{CompletionOutcome, Database};
use crate::error::{FeatherError, Result};
use crate::events::{Event, EventBus};
use crate::media::{MediaStore, MediaUploader};
use crate::pool::resolve_content;
use crate::publish::submit_post;
use crate::scheduling::window_elapsed;
use crate::time::{Clock, Sleeper};
use crate::types::{Account, ScheduledPost};

/// Page size used when draining the due-reservation query
const FETCH_PAGE_SIZE: usize = 25;

/// What happened to one account during a tick
#[derive(Debug, Clone, Default)]
pub struct AccountTickReport {
    pub account_id: String,
    pub considered: usize,
    pub posted: usize,
    pub expired: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Aggregated result of one scheduling tick
#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    pub reports: Vec<AccountTickReport>,
    /// Accounts whose tick failed outright (fetch/store errors)
    pub failed_accounts: Vec<(String, String)>,
}

impl TickSummary {
    pub fn total_posted(&self) -> usize {
        self.reports.iter().map(|r| r.posted).sum()
    }
}

pub struct AutoPostWorker {
    db: Database,
    api: Arc<dyn PublishingApi>,
    store: Arc<dyn MediaStore>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    settings: WorkerConfig,
}

impl AutoPostWorker {
    pub fn new(
        db: Database,
        api: Arc<dyn PublishingApi>,
        store: Arc<dyn MediaStore>,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        settings: WorkerConfig,
    ) -> Self {
        Self {
            db,
            api,
            store,
            sleeper,
            clock,
            events,
            settings,
        }
    }

    /// Run one scheduling tick over all active accounts.
    ///
    /// Accounts are independent: one account's failure is reported in the
    /// summary without touching the others.
    pub async fn run_tick(&self) -> Result<TickSummary> {
        let accounts = self.db.list_active_accounts().await?;
        self.events.emit(Event::TickStarted {
            account_count: accounts.len(),
        });

        let results = join_all(
            accounts
                .iter()
                .map(|account| self.process_account(account)),
        )
        .await;

        let mut summary = TickSummary::default();
        for (account, result) in accounts.iter().zip(results) {
            match result {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    warn!(account_id = %account.account_id, error = %e, "account tick failed");
                    summary
                        .failed_accounts
                        .push((account.account_id.clone(), e.to_string()));
                }
            }
        }

        Ok(summary)
    }

    /// Process one account's due reservations for this tick.
    pub async fn process_account(&self, account: &Account) -> Result<AccountTickReport> {
        let mut report = AccountTickReport {
            account_id: account.account_id.clone(),
            ..Default::default()
        };

        let Some(mut cred) = self.db.get_credential(&account.account_id).await? else {
            warn!(account_id = %account.account_id, "no credentials stored, skipping account");
            report
                .errors
                .push("no credentials stored for account".to_string());
            return Ok(report);
        };

        let now = self.clock.now();
        let due = self
            .db
            .fetch_due_posts(
                &account.account_id,
                now,
                self.settings.batch_size,
                FETCH_PAGE_SIZE,
            )
            .await?;

        for mut post in due {
            report.considered += 1;

            if !post.status.is_due_eligible() {
                report.skipped += 1;
                continue;
            }

            // Expiry short-circuit: past-window reservations are finalized,
            // not posted. Racing workers converge via the conditional write.
            if window_elapsed(&post, now) {
                if self.db.mark_expired(&account.account_id, &post.slot_key).await? {
                    self.events.emit(Event::ReservationExpired {
                        account_id: account.account_id.clone(),
                        slot_key: post.slot_key.clone(),
                    });
                }
                report.expired += 1;
                continue;
            }

            // Resolve content from the pool when the reservation is empty
            if post.needs_content() {
                match resolve_content(&self.db, account, &post.slot_key).await? {
                    Some(claimed) => {
                        self.events.emit(Event::ContentClaimed {
                            account_id: account.account_id.clone(),
                            slot_key: post.slot_key.clone(),
                            pool_id: claimed.pool_id.clone(),
                            consumed: claimed.consumed,
                        });
                        post.content = claimed.content;
                        post.images = claimed.images;
                    }
                    None => {
                        info!(
                            account_id = %account.account_id,
                            slot_key = %post.slot_key,
                            "no claimable pool content, rolling over"
                        );
                        report.skipped += 1;
                        continue;
                    }
                }
            }

            // Media handles; an empty result degrades to a text-only post
            let uploader = MediaUploader::new(&*self.api, &*self.store, &*self.sleeper);
            let media_ids = uploader.upload_all(&cred.access_token, &post.images).await;
            if media_ids.is_empty() && !post.images.is_empty() {
                warn!(
                    account_id = %account.account_id,
                    slot_key = %post.slot_key,
                    "all media uploads failed, posting text-only"
                );
            }
            if !media_ids.is_empty() {
                self.events.emit(Event::MediaUploaded {
                    account_id: account.account_id.clone(),
                    slot_key: post.slot_key.clone(),
                    media_ids: media_ids.clone(),
                });
            }

            match submit_post(
                &*self.api,
                &self.db,
                &*self.clock,
                cred.clone(),
                &post.content,
                &media_ids,
                self.settings.token_refresh_threshold_secs,
            )
            .await
            {
                Ok(outcome) => {
                    if outcome.refreshed {
                        self.events.emit(Event::TokenRefreshed {
                            account_id: account.account_id.clone(),
                        });
                        // Later reservations in this tick use the rotated pair
                        if let Some(updated) = self.db.get_credential(&account.account_id).await? {
                            cred = updated;
                        }
                    }

                    match self
                        .db
                        .mark_posted(
                            &account.account_id,
                            &post.slot_key,
                            &outcome.post_id,
                            &outcome.post_url,
                            self.clock.now(),
                        )
                        .await?
                    {
                        CompletionOutcome::Recorded => {
                            info!(
                                account_id = %account.account_id,
                                slot_key = %post.slot_key,
                                post_id = %outcome.post_id,
                                "post published"
                            );
                            self.events.emit(Event::PostPublished {
                                account_id: account.account_id.clone(),
                                slot_key: post.slot_key.clone(),
                                post_id: outcome.post_id.clone(),
                            });
                            report.posted += 1;

                            if !account.reuse_pool {
                                self.cleanup_media(&post).await;
                            }
                        }
                        CompletionOutcome::AlreadyPosted => {
                            // Another worker recorded this reservation first;
                            // success-by-another, not an error
                            info!(
                                account_id = %account.account_id,
                                slot_key = %post.slot_key,
                                "reservation already completed by another worker"
                            );
                            self.events.emit(Event::PostAlreadyPublished {
                                account_id: account.account_id.clone(),
                                slot_key: post.slot_key.clone(),
                            });
                        }
                    }

                    // Spread load: cap successful posts per account per tick,
                    // remaining candidates roll over
                    if report.posted >= self.settings.posts_per_tick {
                        break;
                    }
                }
                Err(FeatherError::Api(e)) => {
                    let permanent = e.is_permanent();
                    self.db
                        .record_post_failure(
                            &account.account_id,
                            &post.slot_key,
                            &e.to_string(),
                            permanent,
                        )
                        .await?;
                    self.events.emit(Event::PostFailed {
                        account_id: account.account_id.clone(),
                        slot_key: post.slot_key.clone(),
                        error: e.to_string(),
                        permanent,
                    });
                    warn!(
                        account_id = %account.account_id,
                        slot_key = %post.slot_key,
                        permanent,
                        error = %e,
                        "post attempt failed"
                    );
                    report.errors.push(e.to_string());
                }
                Err(e) => {
                    // Store-level trouble mid-reservation; record it and let
                    // the siblings proceed
                    warn!(
                        account_id = %account.account_id,
                        slot_key = %post.slot_key,
                        error = %e,
                        "reservation processing failed"
                    );
                    report.errors.push(e.to_string());
                }
            }
        }

        Ok(report)
    }

    /// Best-effort blob cleanup after a consumed post
    async fn cleanup_media(&self, post: &ScheduledPost) {
        for media_ref in &post.images {
            if let Err(e) = self.store.remove(media_ref).await {
                warn!(media_ref = %media_ref, error = %e, "media cleanup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockPublishingApi;
    use crate::error::ApiErrorKind;
    use crate::media::MemoryMediaStore;
    use crate::time::Sleeper;
    use crate::types::{AccountCredential, PoolItem, PostStatus};
    use async_trait::async_trait;
    use std::time::Duration;

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

    struct Fixture {
        db: Database,
        api: MockPublishingApi,
        store: Arc<MemoryMediaStore>,
        worker: AutoPostWorker,
    }

    async fn fixture_with(api: MockPublishingApi, now: i64) -> Fixture {
        let db = Database::new(":memory:").await.unwrap();
        let store = Arc::new(MemoryMediaStore::new());
        let worker = AutoPostWorker::new(
            db.clone(),
            Arc::new(api.clone()),
            store.clone(),
            Arc::new(NoopSleeper),
            Arc::new(FixedClock(now)),
            EventBus::new(100),
            WorkerConfig::default(),
        );
        Fixture {
            db,
            api,
            store,
            worker,
        }
    }

    async fn seed_account(db: &Database, account_id: &str, reuse: bool) -> Account {
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
                access_token: "at".to_string(),
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

    #[tokio::test]
    async fn test_tick_posts_due_reservation_with_pool_content() {
        let fx = fixture_with(MockPublishingApi::new(), 1_000).await;
        seed_account(&fx.db, "acc1", false).await;

        let mut post = ScheduledPost::new("acc1".into(), "slot1".into(), 990);
        post.time_range = Some("00:00-23:59".to_string());
        fx.db.create_reservation(&post).await.unwrap();
        fx.db
            .create_pool_item(&PoolItem {
                user_id: "user1".to_string(),
                pool_id: "p1".to_string(),
                item_type: "general".to_string(),
                content: "hello world".to_string(),
                images: vec![],
                created_at: 0,
            })
            .await
            .unwrap();

        let summary = fx.worker.run_tick().await.unwrap();
        assert_eq!(summary.total_posted(), 1);

        let stored = fx.db.get_reservation("acc1", "slot1").await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Posted);
        assert_eq!(stored.content, "hello world");
        assert_eq!(stored.post_id.as_deref(), Some("mock-post-1"));
        assert!(fx.db.list_pool_items("user1", "general", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tick_caps_posts_per_account() {
        let fx = fixture_with(MockPublishingApi::new(), 1_000).await;
        seed_account(&fx.db, "acc1", false).await;

        for slot in ["slot1", "slot2", "slot3"] {
            let mut post = ScheduledPost::new("acc1".into(), slot.into(), 990);
            post.content = "ready to go".to_string();
            fx.db.create_reservation(&post).await.unwrap();
        }

        let summary = fx.worker.run_tick().await.unwrap();
        // Default cap is one successful post per account per tick
        assert_eq!(summary.total_posted(), 1);
        assert_eq!(fx.api.post_count(), 1);

        // The rest rolled over and are still due
        let due = fx.db.fetch_due_posts("acc1", 1_000, 10, 25).await.unwrap();
        assert_eq!(due.len(), 2);
    }

    #[tokio::test]
    async fn test_expired_window_short_circuits() {
        // Reservation scheduled early morning; now is well past the window
        let scheduled_at = 1_754_431_200; // 07:00 local on some civil day
        let now = scheduled_at + 3 * 3600; // 10:00 local
        let fx = fixture_with(MockPublishingApi::new(), now).await;
        seed_account(&fx.db, "acc1", false).await;

        let mut post = ScheduledPost::new("acc1".into(), "slot1".into(), scheduled_at);
        post.content = "too late".to_string();
        post.time_range = Some("07:00-09:00".to_string());
        fx.db.create_reservation(&post).await.unwrap();

        let summary = fx.worker.run_tick().await.unwrap();
        assert_eq!(summary.total_posted(), 0);
        assert_eq!(fx.api.post_count(), 0);

        let stored = fx.db.get_reservation("acc1", "slot1").await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Expired);
    }

    #[tokio::test]
    async fn test_empty_pool_rolls_reservation_over() {
        let fx = fixture_with(MockPublishingApi::new(), 1_000).await;
        seed_account(&fx.db, "acc1", false).await;
        fx.db
            .create_reservation(&ScheduledPost::new("acc1".into(), "slot1".into(), 990))
            .await
            .unwrap();

        let summary = fx.worker.run_tick().await.unwrap();
        assert_eq!(summary.total_posted(), 0);
        assert_eq!(summary.reports[0].skipped, 1);
        assert_eq!(fx.api.post_count(), 0);

        let stored = fx.db.get_reservation("acc1", "slot1").await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_permanent_failure_flags_reservation() {
        let api = MockPublishingApi::new().fail_next_post(
            ApiErrorKind::Duplicate,
            Some(403),
            "duplicate content",
        );
        let fx = fixture_with(api, 1_000).await;
        seed_account(&fx.db, "acc1", false).await;

        let mut post = ScheduledPost::new("acc1".into(), "slot1".into(), 990);
        post.content = "already said that".to_string();
        fx.db.create_reservation(&post).await.unwrap();

        let summary = fx.worker.run_tick().await.unwrap();
        assert_eq!(summary.total_posted(), 0);

        let stored = fx.db.get_reservation("acc1", "slot1").await.unwrap().unwrap();
        assert!(stored.permanent_failure);
        assert!(stored.last_post_error.is_some());

        // Flagged reservations never come back as due
        let due = fx.db.fetch_due_posts("acc1", 2_000, 10, 25).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_stays_retryable() {
        let api = MockPublishingApi::new().fail_next_post(
            ApiErrorKind::Server,
            Some(503),
            "service unavailable",
        );
        let fx = fixture_with(api, 1_000).await;
        seed_account(&fx.db, "acc1", false).await;

        let mut post = ScheduledPost::new("acc1".into(), "slot1".into(), 990);
        post.content = "try me again".to_string();
        fx.db.create_reservation(&post).await.unwrap();

        fx.worker.run_tick().await.unwrap();

        let stored = fx.db.get_reservation("acc1", "slot1").await.unwrap().unwrap();
        assert!(!stored.permanent_failure);
        assert_eq!(stored.status, PostStatus::Scheduled);

        // A later tick picks it up again
        let due = fx.db.fetch_due_posts("acc1", 2_000, 10, 25).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reservation_does_not_block_siblings() {
        let api = MockPublishingApi::new().fail_next_post(
            ApiErrorKind::Server,
            Some(500),
            "flake",
        );
        let fx = fixture_with(api, 1_000).await;
        seed_account(&fx.db, "acc1", false).await;

        for slot in ["slot1", "slot2"] {
            let mut post = ScheduledPost::new("acc1".into(), slot.into(), 990);
            post.content = format!("content for {}", slot);
            fx.db.create_reservation(&post).await.unwrap();
        }

        let summary = fx.worker.run_tick().await.unwrap();
        // First attempt failed, the sibling still got published
        assert_eq!(summary.total_posted(), 1);
        assert_eq!(summary.reports[0].errors.len(), 1);
    }

    #[tokio::test]
    async fn test_account_without_credentials_is_reported_not_fatal() {
        let fx = fixture_with(MockPublishingApi::new(), 1_000).await;
        let account = Account {
            account_id: "acc1".to_string(),
            user_id: "user1".to_string(),
            category: "general".to_string(),
            reuse_pool: false,
            active: true,
            created_at: 0,
        };
        fx.db.create_account(&account).await.unwrap();

        let summary = fx.worker.run_tick().await.unwrap();
        assert!(summary.failed_accounts.is_empty());
        assert_eq!(summary.reports[0].errors.len(), 1);
    }

    #[tokio::test]
    async fn test_consume_mode_cleans_up_media_blobs() {
        let fx = fixture_with(MockPublishingApi::new(), 1_000).await;
        seed_account(&fx.db, "acc1", false).await;
        fx.store.insert("img/a.jpg", vec![1; 64]);

        let mut post = ScheduledPost::new("acc1".into(), "slot1".into(), 990);
        post.content = "with media".to_string();
        post.images = vec!["img/a.jpg".to_string()];
        fx.db.create_reservation(&post).await.unwrap();

        fx.worker.run_tick().await.unwrap();

        let stored = fx.db.get_reservation("acc1", "slot1").await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Posted);
        // Blob removed after the consumed post
        assert!(!fx.store.contains("img/a.jpg"));

        let posts = fx.api.posts();
        assert_eq!(posts[0].media_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_reuse_mode_keeps_media_blobs() {
        let fx = fixture_with(MockPublishingApi::new(), 1_000).await;
        seed_account(&fx.db, "acc1", true).await;
        fx.store.insert("img/a.jpg", vec![1; 64]);

        fx.db
            .create_pool_item(&PoolItem {
                user_id: "user1".to_string(),
                pool_id: "p1".to_string(),
                item_type: "general".to_string(),
                content: "evergreen".to_string(),
                images: vec!["img/a.jpg".to_string()],
                created_at: 0,
            })
            .await
            .unwrap();
        fx.db
            .create_reservation(&ScheduledPost::new("acc1".into(), "slot1".into(), 990))
            .await
            .unwrap();

        fx.worker.run_tick().await.unwrap();

        let stored = fx.db.get_reservation("acc1", "slot1").await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Posted);
        // Reuse mode: pool item and blob both survive
        assert_eq!(fx.db.list_pool_items("user1", "general", 10).await.unwrap().len(), 1);
        assert!(fx.store.contains("img/a.jpg"));
    }
}
