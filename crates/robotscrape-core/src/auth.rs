//! API key verification and credit consumption, sitting on top of the
//! `api_keys` store table. Callers never see or persist a raw key, only its
//! SHA-256 hash.

use crate::crypto::{random_token, sha256_hex};
use crate::error::{Error, Result};
use crate::store::api_keys::ConsumeOutcome;
use crate::store::Store;
use crate::types::ApiKey;

/// Outcome of consuming credits against a presented key, ready to surface
/// over HTTP.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub api_key_id: String,
    pub owner: String,
    pub tier: String,
    pub remaining_credits: i64,
}

/// Look up `raw_key` by its hash and atomically deduct `cost` credits.
pub async fn authorize_and_consume(store: &Store, raw_key: &str, cost: i64) -> Result<Authorized> {
    let hash = sha256_hex(raw_key.as_bytes());
    let key = store
        .get_api_key_by_hash(&hash)
        .await?
        .ok_or(Error::Unauthorized)?;

    match store.consume_credits(&hash, cost).await? {
        ConsumeOutcome::Ok { remaining_credits } => Ok(Authorized {
            api_key_id: key.id,
            owner: key.owner,
            tier: key.tier,
            remaining_credits,
        }),
        ConsumeOutcome::InvalidKey => Err(Error::Unauthorized),
        ConsumeOutcome::Inactive => Err(Error::Unauthorized),
        ConsumeOutcome::InsufficientCredits => Err(Error::InsufficientCredits),
    }
}

/// Look up `raw_key` without consuming credits, used for read-only
/// endpoints like job status.
pub async fn verify(store: &Store, raw_key: &str) -> Result<ApiKey> {
    let hash = sha256_hex(raw_key.as_bytes());
    let key = store
        .get_api_key_by_hash(&hash)
        .await?
        .ok_or(Error::Unauthorized)?;
    if !key.is_active {
        return Err(Error::Unauthorized);
    }
    Ok(key)
}

/// Mint a new credential. Returns the raw key (shown once) and the row
/// persisted to the store.
pub async fn issue_api_key(store: &Store, owner: &str, tier: &str, credits: i64) -> Result<(String, ApiKey)> {
    let raw_key = random_token("rbs");
    let hash = sha256_hex(raw_key.as_bytes());
    let key = ApiKey {
        id: uuid::Uuid::new_v4().to_string(),
        key_hash: hash,
        owner: owner.to_string(),
        tier: tier.to_string(),
        remaining_credits: credits,
        is_active: true,
        last_used_at: None,
        created_at: chrono::Utc::now(),
    };
    store.insert_api_key(&key).await?;
    Ok((raw_key, key))
}
