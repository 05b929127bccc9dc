//! Post submission
//!
//! Submits the finished text + media payload with the account's access
//! token. Auth-shaped failures trigger exactly one token refresh followed by
//! exactly one retry; refresh also happens proactively when the access token
//! is near expiry. Either way the refresh runs at most once per post attempt.

use tracing::warn;

use crate::api::PublishingApi;
use crate::db::Database;
use crate::error::{FeatherError, Result};
use crate::time::Clock;
use crate::tokens::refresh_credential;
use crate::types::AccountCredential;

/// Post ids resolve to a public URL without an author lookup
pub const POST_URL_BASE: &str = "https://x.com/i/web/status";

pub fn post_url_for(post_id: &str) -> String {
    format!("{}/{}", POST_URL_BASE, post_id)
}

/// Result of a successful submission
#[derive(Debug, Clone)]
pub struct PostOutcome {
    pub post_id: String,
    pub post_url: String,
    /// Whether a token refresh happened during this attempt
    pub refreshed: bool,
}

/// Submit a post for the given account credential.
///
/// On an auth-expired failure the credential is refreshed once and the post
/// retried once; a second failure is terminal for this attempt. All other
/// failures are returned as-is for the caller to classify.
pub async fn submit_post(
    api: &dyn PublishingApi,
    db: &Database,
    clock: &dyn Clock,
    cred: AccountCredential,
    text: &str,
    media_ids: &[String],
    refresh_threshold_secs: i64,
) -> Result<PostOutcome> {
    if text.trim().is_empty() {
        warn!(account_id = %cred.account_id, "submitting post with empty text");
    }

    let mut cred = cred;
    let mut refreshed = false;

    // Proactive rotation when the token is near expiry
    if cred.expires_within(clock.now(), refresh_threshold_secs) {
        cred = refresh_credential(api, db, &cred, clock.now()).await?;
        refreshed = true;
    }

    match api.create_post(&cred.access_token, text, media_ids).await {
        Ok(post_id) => Ok(PostOutcome {
            post_url: post_url_for(&post_id),
            post_id,
            refreshed,
        }),
        Err(e) if e.is_auth_expired() && !refreshed => {
            warn!(account_id = %cred.account_id, error = %e, "post rejected for auth, refreshing token");
            let cred = refresh_credential(api, db, &cred, clock.now()).await?;

            let post_id = api
                .create_post(&cred.access_token, text, media_ids)
                .await
                .map_err(FeatherError::Api)?;

            Ok(PostOutcome {
                post_url: post_url_for(&post_id),
                post_id,
                refreshed: true,
            })
        }
        Err(e) => Err(e.into()),
    }
}
