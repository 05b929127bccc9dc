//! OAuth2 token refresh
//!
//! Exchanges a stored refresh token for a new token pair and persists it.
//! The persisted credential is always internally consistent: access token,
//! refresh token and expiry are replaced together or not at all.

use tracing::info;

use crate::api::PublishingApi;
use crate::db::Database;
use crate::error::Result;
use crate::types::AccountCredential;

/// Exchange the credential's refresh token and persist the new pair.
///
/// The new refresh token falls back to the old one when the provider omits
/// it; the expiry is `now + expires_in`, or 0 (unknown) when absent. Callers
/// invoke this at most once per post attempt.
pub async fn refresh_credential(
    api: &dyn PublishingApi,
    db: &Database,
    cred: &AccountCredential,
    now: i64,
) -> Result<AccountCredential> {
    let grant = api
        .refresh_token(&cred.client_id, &cred.client_secret, &cred.refresh_token)
        .await?;

    let refresh_token = grant
        .refresh_token
        .unwrap_or_else(|| cred.refresh_token.clone());
    let token_expires_at = match grant.expires_in {
        Some(expires_in) => now + expires_in,
        None => 0,
    };

    db.update_credential_tokens(
        &cred.account_id,
        &grant.access_token,
        &refresh_token,
        token_expires_at,
        now,
    )
    .await?;

    info!(account_id = %cred.account_id, "rotated access token");

    Ok(AccountCredential {
        account_id: cred.account_id.clone(),
        access_token: grant.access_token,
        refresh_token,
        token_expires_at,
        client_id: cred.client_id.clone(),
        client_secret: cred.client_secret.clone(),
    })
}
