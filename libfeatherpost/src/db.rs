//! Database operations for Featherpost
//!
//! All cross-worker coordination happens here, through the store's
//! conditional operations: conditional DELETE as the pool-claim primitive and
//! conditional UPDATE for completion and expiry. No advisory locks.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{Account, AccountCredential, PoolItem, PostStatus, ScheduledPost};

/// Outcome of the completion write for a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// This worker recorded the post
    Recorded,
    /// The condition failed: another worker already completed the
    /// reservation. Treated as success-by-another, never as an error.
    AlreadyPosted,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = if db_path == ":memory:" {
            // Every pooled connection gets its own in-memory database, so an
            // in-memory pool must hold exactly one connection
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .map_err(DbError::SqlxError)?
        } else {
            // Expand path and create parent directories
            let expanded_path = shellexpand::tilde(db_path).to_string();
            let path = Path::new(&expanded_path);

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }

            // Forward slashes work on both Windows and Unix; mode=rwc creates
            // the database file if it does not exist
            let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
            SqlitePool::connect(&db_url)
                .await
                .map_err(DbError::SqlxError)?
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Reservations
    // ========================================================================

    /// Create a reservation
    pub async fn create_reservation(&self, post: &ScheduledPost) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_posts
                (account_id, slot_key, content, images, scheduled_at, time_range,
                 status, posted_at, post_id, post_url, permanent_failure, last_post_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.account_id)
        .bind(&post.slot_key)
        .bind(&post.content)
        .bind(encode_images(&post.images))
        .bind(post.scheduled_at)
        .bind(&post.time_range)
        .bind(post.status.as_str())
        .bind(post.posted_at)
        .bind(&post.post_id)
        .bind(&post.post_url)
        .bind(post.permanent_failure as i32)
        .bind(&post.last_post_error)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a reservation by key
    pub async fn get_reservation(
        &self,
        account_id: &str,
        slot_key: &str,
    ) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(
            r#"
            SELECT account_id, slot_key, content, images, scheduled_at, time_range,
                   status, posted_at, post_id, post_url, permanent_failure, last_post_error
            FROM scheduled_posts
            WHERE account_id = ? AND slot_key = ?
            "#,
        )
        .bind(account_id)
        .bind(slot_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_reservation(&r)))
    }

    /// Fetch due, unexpired, unclaimed reservations for an account.
    ///
    /// Reads key-ordered pages of `page_size` rows and applies the
    /// status/permanent-failure filter client-side, requesting further pages
    /// until `batch` reservations are collected or the source is exhausted.
    /// Read-only; storage errors propagate to the caller.
    pub async fn fetch_due_posts(
        &self,
        account_id: &str,
        now: i64,
        batch: usize,
        page_size: usize,
    ) -> Result<Vec<ScheduledPost>> {
        let mut due = Vec::new();
        let mut cursor = String::new();

        loop {
            let rows = sqlx::query(
                r#"
                SELECT account_id, slot_key, content, images, scheduled_at, time_range,
                       status, posted_at, post_id, post_url, permanent_failure, last_post_error
                FROM scheduled_posts
                WHERE account_id = ? AND scheduled_at <= ? AND slot_key > ?
                ORDER BY slot_key
                LIMIT ?
                "#,
            )
            .bind(account_id)
            .bind(now)
            .bind(&cursor)
            .bind(page_size as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

            let exhausted = rows.len() < page_size;

            for row in &rows {
                let post = row_to_reservation(row);
                // The cursor advances over filtered-out rows too
                cursor = post.slot_key.clone();

                if post.status.is_due_eligible() && !post.permanent_failure {
                    due.push(post);
                    if due.len() >= batch {
                        return Ok(due);
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        Ok(due)
    }

    /// Transition a reservation to expired.
    ///
    /// Conditional: only succeeds while the reservation is still unfinalized,
    /// so racing workers converge on a single transition. Returns whether
    /// this call performed it.
    pub async fn mark_expired(&self, account_id: &str, slot_key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'expired'
            WHERE account_id = ? AND slot_key = ?
              AND status IN ('scheduled', 'pending_quote')
            "#,
        )
        .bind(account_id)
        .bind(slot_key)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Write claimed content onto a reservation
    pub async fn set_reservation_content(
        &self,
        account_id: &str,
        slot_key: &str,
        content: &str,
        images: &[String],
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET content = ?, images = ?
            WHERE account_id = ? AND slot_key = ?
            "#,
        )
        .bind(content)
        .bind(encode_images(images))
        .bind(account_id)
        .bind(slot_key)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Record completion of a reservation, exactly once.
    ///
    /// The condition requires that no post id is set and the status has not
    /// reached posted; if it fails, another worker already completed the
    /// reservation and `AlreadyPosted` is returned. The status change also
    /// removes the reservation from future due-queries.
    pub async fn mark_posted(
        &self,
        account_id: &str,
        slot_key: &str,
        post_id: &str,
        post_url: &str,
        posted_at: i64,
    ) -> Result<CompletionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'posted', post_id = ?, post_url = ?, posted_at = ?,
                last_post_error = NULL
            WHERE account_id = ? AND slot_key = ?
              AND post_id IS NULL AND status <> 'posted'
            "#,
        )
        .bind(post_id)
        .bind(post_url)
        .bind(posted_at)
        .bind(account_id)
        .bind(slot_key)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 1 {
            Ok(CompletionOutcome::Recorded)
        } else {
            Ok(CompletionOutcome::AlreadyPosted)
        }
    }

    /// Record a failed post attempt on the reservation
    pub async fn record_post_failure(
        &self,
        account_id: &str,
        slot_key: &str,
        error: &str,
        permanent: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET last_post_error = ?, permanent_failure = permanent_failure OR ?
            WHERE account_id = ? AND slot_key = ?
            "#,
        )
        .bind(error)
        .bind(permanent as i32)
        .bind(account_id)
        .bind(slot_key)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Text of the account's most recently posted reservation
    pub async fn last_posted_content(&self, account_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT content FROM scheduled_posts
            WHERE account_id = ? AND status = 'posted'
            ORDER BY posted_at DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| r.get("content")))
    }

    /// List reservations, optionally filtered by account, newest slot first
    pub async fn list_reservations(
        &self,
        account_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScheduledPost>> {
        let rows = if let Some(account) = account_id {
            sqlx::query(
                r#"
                SELECT account_id, slot_key, content, images, scheduled_at, time_range,
                       status, posted_at, post_id, post_url, permanent_failure, last_post_error
                FROM scheduled_posts
                WHERE account_id = ?
                ORDER BY scheduled_at DESC
                LIMIT ?
                "#,
            )
            .bind(account)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT account_id, slot_key, content, images, scheduled_at, time_range,
                       status, posted_at, post_id, post_url, permanent_failure, last_post_error
                FROM scheduled_posts
                ORDER BY scheduled_at DESC
                LIMIT ?
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_reservation).collect())
    }

    /// Reservation counts per status
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n FROM scheduled_posts
            GROUP BY status ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }

    // ========================================================================
    // Content pool
    // ========================================================================

    /// Create a pool item
    pub async fn create_pool_item(&self, item: &PoolItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pool_items (user_id, pool_id, item_type, content, images, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.user_id)
        .bind(&item.pool_id)
        .bind(&item.item_type)
        .bind(&item.content)
        .bind(encode_images(&item.images))
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// List pool items for a user filtered by category
    pub async fn list_pool_items(
        &self,
        user_id: &str,
        item_type: &str,
        limit: usize,
    ) -> Result<Vec<PoolItem>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, pool_id, item_type, content, images, created_at
            FROM pool_items
            WHERE user_id = ? AND item_type = ?
            ORDER BY created_at
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(item_type)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| PoolItem {
                user_id: r.get("user_id"),
                pool_id: r.get("pool_id"),
                item_type: r.get("item_type"),
                content: r.get("content"),
                images: decode_images(&r.get::<String, _>("images")),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Attempt a destructive claim of a pool item.
    ///
    /// The mutual-exclusion primitive: a conditional delete requiring the
    /// item to still exist. The delete succeeding is the proof of exclusive
    /// ownership; `None` means another worker won the race, which callers
    /// treat as fallthrough to the next candidate, not as an error.
    pub async fn try_claim_pool_item(
        &self,
        user_id: &str,
        pool_id: &str,
    ) -> Result<Option<PoolItem>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, pool_id, item_type, content, images, created_at
            FROM pool_items
            WHERE user_id = ? AND pool_id = ?
            "#,
        )
        .bind(user_id)
        .bind(pool_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let item = PoolItem {
            user_id: row.get("user_id"),
            pool_id: row.get("pool_id"),
            item_type: row.get("item_type"),
            content: row.get("content"),
            images: decode_images(&row.get::<String, _>("images")),
            created_at: row.get("created_at"),
        };

        // Pool items are immutable after creation, so the earlier read is
        // valid iff this delete wins.
        let result = sqlx::query(
            r#"
            DELETE FROM pool_items WHERE user_id = ? AND pool_id = ?
            "#,
        )
        .bind(user_id)
        .bind(pool_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 1 {
            Ok(Some(item))
        } else {
            Ok(None)
        }
    }

    // ========================================================================
    // Accounts and credentials
    // ========================================================================

    /// Create an account
    pub async fn create_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, user_id, category, reuse_pool, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.account_id)
        .bind(&account.user_id)
        .bind(&account.category)
        .bind(account.reuse_pool as i32)
        .bind(account.active as i32)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// List accounts eligible for auto-posting
    pub async fn list_active_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, user_id, category, reuse_pool, active, created_at
            FROM accounts
            WHERE active = 1
            ORDER BY account_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| Account {
                account_id: r.get("account_id"),
                user_id: r.get("user_id"),
                category: r.get("category"),
                reuse_pool: r.get::<i32, _>("reuse_pool") != 0,
                active: r.get::<i32, _>("active") != 0,
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Create or replace an account's credentials
    pub async fn upsert_credential(&self, cred: &AccountCredential, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_credentials
                (account_id, access_token, refresh_token, token_expires_at,
                 client_id, client_secret, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at,
                client_id = excluded.client_id,
                client_secret = excluded.client_secret,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&cred.account_id)
        .bind(&cred.access_token)
        .bind(&cred.refresh_token)
        .bind(cred.token_expires_at)
        .bind(&cred.client_id)
        .bind(&cred.client_secret)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get an account's credentials
    pub async fn get_credential(&self, account_id: &str) -> Result<Option<AccountCredential>> {
        let row = sqlx::query(
            r#"
            SELECT account_id, access_token, refresh_token, token_expires_at,
                   client_id, client_secret
            FROM account_credentials
            WHERE account_id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| AccountCredential {
            account_id: r.get("account_id"),
            access_token: r.get("access_token"),
            refresh_token: r.get("refresh_token"),
            token_expires_at: r.get("token_expires_at"),
            client_id: r.get("client_id"),
            client_secret: r.get("client_secret"),
        }))
    }

    /// Replace the token pair and expiry in a single statement.
    ///
    /// Invariant: access token, refresh token and expiry change together or
    /// not at all.
    pub async fn update_credential_tokens(
        &self,
        account_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: i64,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE account_credentials
            SET access_token = ?, refresh_token = ?, token_expires_at = ?, updated_at = ?
            WHERE account_id = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .bind(now)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }
}

fn encode_images(images: &[String]) -> String {
    serde_json::to_string(images).unwrap_or_else(|_| "[]".to_string())
}

fn decode_images(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_reservation(row: &sqlx::sqlite::SqliteRow) -> ScheduledPost {
    ScheduledPost {
        account_id: row.get("account_id"),
        slot_key: row.get("slot_key"),
        content: row.get("content"),
        images: decode_images(&row.get::<String, _>("images")),
        scheduled_at: row.get("scheduled_at"),
        time_range: row.get("time_range"),
        status: PostStatus::from_str(&row.get::<String, _>("status")),
        posted_at: row.get("posted_at"),
        post_id: row.get("post_id"),
        post_url: row.get("post_url"),
        permanent_failure: row.get::<i32, _>("permanent_failure") != 0,
        last_post_error: row.get("last_post_error"),
    }
}
