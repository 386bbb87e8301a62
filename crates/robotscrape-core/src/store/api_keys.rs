use chrono::Utc;

use super::Store;
use crate::error::Result;
use crate::types::ApiKey;

/// Outcome of a credit-consuming auth attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Ok { remaining_credits: i64 },
    InvalidKey,
    Inactive,
    InsufficientCredits,
}

impl Store {
    pub async fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    pub async fn get_api_key_by_id(&self, id: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// Atomically deduct `amount` credits from the key identified by `id`
    /// (not its hash) - used by the scheduler, which only stores the
    /// owning key's id.
    pub async fn consume_credits_by_id(&self, id: &str, amount: i64) -> Result<ConsumeOutcome> {
        let Some(key) = self.get_api_key_by_id(id).await? else {
            return Ok(ConsumeOutcome::InvalidKey);
        };
        self.consume_credits(&key.key_hash, amount).await
    }

    pub async fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO api_keys (id, key_hash, owner, tier, remaining_credits, is_active, last_used_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.id)
        .bind(&key.key_hash)
        .bind(&key.owner)
        .bind(&key.tier)
        .bind(key.remaining_credits)
        .bind(key.is_active)
        .bind(key.last_used_at)
        .bind(key.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Atomically decrement `remaining_credits` by `amount` iff the key is
    /// active and has enough credits. A single conditional UPDATE avoids the
    /// read-modify-write race a check-then-decrement pair would have under
    /// concurrent requests.
    pub async fn consume_credits(&self, key_hash: &str, amount: i64) -> Result<ConsumeOutcome> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE api_keys SET remaining_credits = remaining_credits - ?, last_used_at = ?
             WHERE key_hash = ? AND is_active = 1 AND remaining_credits >= ?",
        )
        .bind(amount)
        .bind(now)
        .bind(key_hash)
        .bind(amount)
        .execute(self.pool())
        .await?;

        if result.rows_affected() > 0 {
            let key = self.get_api_key_by_hash(key_hash).await?;
            return Ok(ConsumeOutcome::Ok {
                remaining_credits: key.map(|k| k.remaining_credits).unwrap_or_default(),
            });
        }

        match self.get_api_key_by_hash(key_hash).await? {
            None => Ok(ConsumeOutcome::InvalidKey),
            Some(k) if !k.is_active => Ok(ConsumeOutcome::Inactive),
            Some(_) => Ok(ConsumeOutcome::InsufficientCredits),
        }
    }
}
