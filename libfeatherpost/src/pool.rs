//! Content-pool claiming
//!
//! Fills a reservation whose content is empty from the shared pool, filtered
//! by the account's category. Two policies:
//!
//! - **Reuse**: non-destructive selection from up to two randomly-drawn
//!   candidates, preferring the second when the first matches the account's
//!   most recently posted text (anti-repetition).
//! - **Consume**: shuffled candidates are claimed with a conditional delete,
//!   in order, until one delete succeeds. Only one of several racing workers
//!   can win a given item; losing a race falls through to the next
//!   candidate.

use rand::seq::SliceRandom;
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::types::Account;

/// How many pool candidates are considered per claim attempt
const CANDIDATE_LIMIT: usize = 25;

/// Content assigned to a reservation from the pool
#[derive(Debug, Clone)]
pub struct ClaimedContent {
    pub pool_id: String,
    pub content: String,
    pub images: Vec<String>,
    /// true when the pool item was destructively consumed
    pub consumed: bool,
}

/// Resolve content for the reservation at `slot_key`.
///
/// Writes the chosen content onto the reservation and returns what was
/// claimed, or `None` when the pool has nothing claimable; the caller must
/// then skip posting.
pub async fn resolve_content(
    db: &Database,
    account: &Account,
    slot_key: &str,
) -> Result<Option<ClaimedContent>> {
    let mut candidates = db
        .list_pool_items(&account.user_id, &account.category, CANDIDATE_LIMIT)
        .await?;

    if candidates.is_empty() {
        debug!(account_id = %account.account_id, category = %account.category, "content pool empty");
        return Ok(None);
    }

    {
        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
    }

    if account.reuse_pool {
        // Two randomly-drawn candidates; avoid repeating what this account
        // posted last
        let last_posted = db.last_posted_content(&account.account_id).await?;
        let pick = if candidates.len() > 1
            && last_posted.as_deref() == Some(candidates[0].content.as_str())
        {
            &candidates[1]
        } else {
            &candidates[0]
        };

        db.set_reservation_content(&account.account_id, slot_key, &pick.content, &pick.images)
            .await?;

        return Ok(Some(ClaimedContent {
            pool_id: pick.pool_id.clone(),
            content: pick.content.clone(),
            images: pick.images.clone(),
            consumed: false,
        }));
    }

    // Consume mode: the first successful conditional delete wins the item.
    // A failed claim is a lost race, not an error.
    for candidate in &candidates {
        match db
            .try_claim_pool_item(&account.user_id, &candidate.pool_id)
            .await?
        {
            Some(item) => {
                db.set_reservation_content(&account.account_id, slot_key, &item.content, &item.images)
                    .await?;

                return Ok(Some(ClaimedContent {
                    pool_id: item.pool_id,
                    content: item.content,
                    images: item.images,
                    consumed: true,
                }));
            }
            None => {
                debug!(
                    account_id = %account.account_id,
                    pool_id = %candidate.pool_id,
                    "lost claim race, trying next candidate"
                );
            }
        }
    }

    Ok(None)
}
