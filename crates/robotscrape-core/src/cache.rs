//! Content-addressed result caching. The fingerprint is derived from the
//! canonicalized request shape only, so two callers asking for the same
//! fields from the same URL share a cache entry regardless of who they are.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;

use crate::blob::BlobStore;
use crate::crypto::sha256_hex;
use crate::error::Result;
use crate::store::Store;
use crate::types::ExtractParams;

/// A cache lookup that found a usable, unexpired entry.
pub struct CacheHit {
    pub result: Value,
    pub token_usage: i64,
}

/// Deterministic fingerprint for `params`: the URL, sorted fields, the
/// schema (if any), and trimmed instructions. Options are excluded - they
/// affect how the page is rendered, not what the answer means.
pub fn fingerprint(params: &ExtractParams) -> String {
    let mut fields = params.fields.clone();
    fields.sort();
    fields.dedup();

    let canonical = serde_json::json!({
        "url": params.url,
        "fields": fields,
        "schema": params.schema,
        "instructions": params.instructions.as_deref().map(str::trim),
    });

    let stable = stable_stringify(&canonical);
    sha256_hex(stable.as_bytes())
}

/// Render a `serde_json::Value` with object keys in sorted order, so
/// semantically identical values always produce the same bytes.
fn stable_stringify(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, stable_stringify(&map[k])))
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        Value::Array(items) => {
            let entries: Vec<String> = items.iter().map(stable_stringify).collect();
            format!("[{}]", entries.join(","))
        }
        other => other.to_string(),
    }
}

pub struct ResultCache {
    store: Store,
    blobs: Arc<dyn BlobStore>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Store, blobs: Arc<dyn BlobStore>, ttl_secs: i64) -> Self {
        Self {
            store,
            blobs,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub async fn lookup(&self, params: &ExtractParams) -> Result<Option<CacheHit>> {
        let fp = fingerprint(params);
        let Some(entry) = self.store.get_cache_entry(&fp).await? else {
            return Ok(None);
        };
        if entry.expires_at <= Utc::now() {
            return Ok(None);
        }

        let raw = self.blobs.get(&entry.result_path).await?;
        let result: Value = serde_json::from_slice(&raw)
            .map_err(|e| crate::Error::Server(format!("corrupt cached result: {e}")))?;

        let store = self.store.clone();
        let hit_fp = fp.clone();
        tokio::spawn(async move {
            if let Err(e) = store.record_cache_hit(&hit_fp).await {
                tracing::warn!(fingerprint = %hit_fp, error = %e, "failed to record cache hit");
            }
        });

        Ok(Some(CacheHit {
            result,
            token_usage: entry.token_usage,
        }))
    }

    pub async fn store_result(
        &self,
        params: &ExtractParams,
        result: &Value,
        token_usage: i64,
        content_chars: i64,
    ) -> Result<()> {
        let fp = fingerprint(params);
        let bytes = serde_json::to_vec(result)
            .map_err(|e| crate::Error::Server(format!("failed to serialize result: {e}")))?;
        let key = format!("cache/{fp}.json");
        self.blobs.put(&key, &bytes).await?;
        self.store
            .upsert_cache_entry(&fp, &key, token_usage, content_chars, Utc::now() + self.ttl)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;
    use crate::store::test_store;
    use crate::types::ExtractOptions;
    use tempfile::TempDir;

    fn params(url: &str, fields: Vec<&str>) -> ExtractParams {
        ExtractParams {
            url: url.into(),
            fields: fields.into_iter().map(String::from).collect(),
            schema: None,
            instructions: None,
            options: ExtractOptions::default(),
        }
    }

    #[test]
    fn fingerprint_is_order_independent_on_fields() {
        let a = params("https://example.com", vec!["price", "title"]);
        let b = params("https://example.com", vec!["title", "price"]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_differs_on_url() {
        let a = params("https://example.com/a", vec!["title"]);
        let b = params("https://example.com/b", vec!["title"]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_ignores_options() {
        let mut a = params("https://example.com", vec!["title"]);
        let mut b = a.clone();
        a.options.screenshot = true;
        b.options.screenshot = false;
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[tokio::test]
    async fn store_then_lookup_round_trips_and_increments_hits() {
        let store = test_store().await;
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()));
        let cache = ResultCache::new(store, blobs, 900);

        let p = params("https://example.com", vec!["title"]);
        let result = serde_json::json!({"title": "Example"});
        cache.store_result(&p, &result, 50, 1200).await.unwrap();

        let hit = cache.lookup(&p).await.unwrap().unwrap();
        assert_eq!(hit.result, result);
        assert_eq!(hit.token_usage, 50);
    }

    #[tokio::test]
    async fn lookup_misses_for_unseen_params() {
        let store = test_store().await;
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()));
        let cache = ResultCache::new(store, blobs, 900);

        let p = params("https://unseen.example", vec!["title"]);
        assert!(cache.lookup(&p).await.unwrap().is_none());
    }
}
