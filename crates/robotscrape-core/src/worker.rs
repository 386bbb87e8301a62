//! Queue-consuming worker: dequeues leased job messages in batches and
//! drives each one through [`crate::pipeline::Pipeline`], matching the
//! processing -> {completed,failed,blocked} sequence jobs go through.
//! Webhook delivery and acking are fire-and-forget relative to the job's
//! own terminal state - a dropped webhook never resurrects a finished job.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::blob::BlobStore;
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::llm::ModelKeyPair;
use crate::pipeline::{persist_snapshot, Pipeline, PipelineOutcome, ProviderSelection};
use crate::queue::JobQueue;
use crate::store::Store;
use crate::types::{Job, ScrapeLog};
use crate::webhook::{self, WebhookPayload};

/// Build the ordered (model, key) fallback list for a provider: the default
/// model tried against every configured key, then each fallback model
/// tried against every configured key.
pub fn build_model_key_pairs(provider: &ProviderConfig) -> Result<Vec<ModelKeyPair>> {
    let mut keys = Vec::new();
    if let Some(key) = &provider.api_key {
        keys.push(key.resolve()?);
    }
    for key in &provider.api_keys {
        keys.push(key.resolve()?);
    }
    if keys.is_empty() {
        return Err(Error::Config("provider has no api_key or api_keys configured".into()));
    }

    let default_model = provider
        .default_model
        .clone()
        .ok_or_else(|| Error::Config("provider has no default_model configured".into()))?;
    let mut models = vec![default_model];
    models.extend(provider.fallback_models.iter().cloned());

    let mut pairs = Vec::with_capacity(models.len() * keys.len());
    for model in &models {
        for key in &keys {
            pairs.push(ModelKeyPair {
                model: model.clone(),
                api_key: key.clone(),
            });
        }
    }
    Ok(pairs)
}

pub struct WorkerConfig {
    pub provider_name: String,
    pub base_url: String,
    pub pairs: Vec<ModelKeyPair>,
    pub cache_enabled: bool,
    pub default_webhook_secret: Option<String>,
    pub batch_size: usize,
}

pub struct Worker {
    store: Store,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<Pipeline>,
    blobs: Arc<dyn BlobStore>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(store: Store, queue: Arc<dyn JobQueue>, pipeline: Arc<Pipeline>, blobs: Arc<dyn BlobStore>, config: WorkerConfig) -> Self {
        Self {
            store,
            queue,
            pipeline,
            blobs,
            config,
        }
    }

    /// Dequeue up to the configured batch size and process each leased
    /// message in turn. Returns the number of messages processed.
    pub async fn run_once(&self) -> Result<usize> {
        let leased = self.queue.dequeue_batch(self.config.batch_size).await?;
        for message in &leased {
            self.process_one(&message.job_id).await;
            self.queue.ack(&message.message_id).await?;
        }
        Ok(leased.len())
    }

    async fn process_one(&self, job_id: &str) {
        if let Err(e) = self.process_one_inner(job_id).await {
            tracing::error!(job_id, error = %e, "failed to process job");
        }
    }

    async fn process_one_inner(&self, job_id: &str) -> Result<()> {
        let Some(job) = self.store.get_job(job_id).await? else {
            tracing::warn!(job_id, "dequeued job no longer exists, dropping");
            return Ok(());
        };

        self.store.mark_job_processing(job_id).await?;
        let started = Instant::now();
        let params = job.params()?;

        let selection = ProviderSelection {
            provider: &self.config.provider_name,
            base_url: &self.config.base_url,
            pairs: &self.config.pairs,
        };

        let outcome = self.pipeline.run(&params, selection, self.config.cache_enabled).await;
        let latency_ms = started.elapsed().as_millis() as i64;
        let store_content = params.options.store_content;

        match outcome {
            Ok(PipelineOutcome::CacheHit { data, token_usage }) => {
                self.finish_completed(&job, &data, token_usage, latency_ms, None, true).await
            }
            Ok(PipelineOutcome::Completed { scrape, data, token_usage }) => {
                let content_blob_key = if store_content {
                    persist_snapshot(self.blobs.as_ref(), &job.id, &scrape).await.ok().flatten()
                } else {
                    None
                };
                self.finish_completed(&job, &data, token_usage, latency_ms, content_blob_key, false).await
            }
            Ok(PipelineOutcome::Blocked { scrape }) => {
                let content_blob_key = if store_content {
                    persist_snapshot(self.blobs.as_ref(), &job.id, &scrape).await.ok().flatten()
                } else {
                    None
                };
                self.finish_blocked(&job, latency_ms, content_blob_key).await
            }
            Err(e) => self.finish_failed(&job, &e, latency_ms).await,
        }
    }

    async fn finish_completed(
        &self,
        job: &Job,
        data: &serde_json::Value,
        token_usage: i64,
        latency_ms: i64,
        content_blob_key: Option<String>,
        cache_hit: bool,
    ) -> Result<()> {
        let result_path = format!("results/{}.json", job.id);
        let bytes = serde_json::to_vec(data).map_err(|e| Error::Server(format!("failed to serialize job result: {e}")))?;
        self.blobs.put(&result_path, &bytes).await?;
        self.store.mark_job_completed(&job.id, &result_path, token_usage, latency_ms).await?;

        self.log_attempt(job, "completed", Some(token_usage), latency_ms, false, None, content_blob_key, Some(result_path.clone()))
            .await;

        if cache_hit {
            let _ = self
                .store
                .insert_event_log(&uuid::Uuid::new_v4().to_string(), job.api_key_id.as_deref(), "cache_hit", None)
                .await;
        }

        self.fire_webhook(job, "completed", Some(result_path), Some(data.clone()), None).await;
        Ok(())
    }

    async fn finish_blocked(&self, job: &Job, latency_ms: i64, content_blob_key: Option<String>) -> Result<()> {
        self.store.mark_job_blocked(&job.id).await?;
        self.log_attempt(job, "blocked", None, latency_ms, true, None, content_blob_key, None).await;
        self.fire_webhook(job, "blocked", None, None, Some("target site blocked the request".to_string())).await;
        Ok(())
    }

    async fn finish_failed(&self, job: &Job, error: &Error, latency_ms: i64) -> Result<()> {
        let message = error.public_message();
        self.store.mark_job_failed(&job.id, &message).await?;
        self.log_attempt(job, "failed", None, latency_ms, false, Some(message.clone()), None, None).await;
        self.fire_webhook(job, "failed", None, None, Some(message)).await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_attempt(
        &self,
        job: &Job,
        status: &str,
        token_usage: Option<i64>,
        latency_ms: i64,
        blocked: bool,
        error_msg: Option<String>,
        content_blob_key: Option<String>,
        result_blob_key: Option<String>,
    ) {
        let log = ScrapeLog {
            id: uuid::Uuid::new_v4().to_string(),
            api_key_id: job.api_key_id.clone(),
            url: job.url.clone(),
            params_json: job.params_json.clone(),
            token_usage,
            latency_ms: Some(latency_ms),
            status: status.to_string(),
            error_msg,
            content_blob_key,
            result_blob_key,
            blocked,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_scrape_log(&log).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to record scrape log");
        }
    }

    async fn fire_webhook(&self, job: &Job, status: &str, result_path: Option<String>, data: Option<serde_json::Value>, error: Option<String>) {
        let Some(url) = job.webhook_url.clone() else { return };
        let secret = job.webhook_secret.clone().or_else(|| self.config.default_webhook_secret.clone());
        let store = self.store.clone();
        let job_id = job.id.clone();
        let status = status.to_string();

        tokio::spawn(async move {
            let payload = WebhookPayload {
                job_id,
                status,
                result_path,
                data,
                error,
            };
            let _ = webhook::send_webhook(&store, &url, secret.as_deref(), &payload).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;
    use crate::browser::MockBrowserAdapter;
    use crate::cache::ResultCache;
    use crate::config::ConfigValue;
    use crate::llm::MockLlmAdapter;
    use crate::queue::InMemoryJobQueue;
    use crate::store::test_store;
    use crate::types::{ExtractOptions, ExtractParams, JobStatus};
    use tempfile::TempDir;

    fn sample_params(store_content: bool) -> ExtractParams {
        ExtractParams {
            url: "https://example.com".into(),
            fields: vec!["title".into()],
            schema: None,
            instructions: None,
            options: ExtractOptions {
                store_content,
                ..Default::default()
            },
        }
    }

    async fn harness(
        browser: Arc<dyn crate::browser::BrowserAdapter>,
        llm: Arc<dyn crate::llm::LlmAdapter>,
    ) -> (Worker, Store, Arc<dyn JobQueue>, TempDir) {
        let store = test_store().await;
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()));
        let cache = Arc::new(ResultCache::new(store.clone(), blobs.clone(), 900));
        let pipeline = Arc::new(Pipeline::new(cache, browser, None, llm, 20_000));
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());

        let config = WorkerConfig {
            provider_name: "mock".into(),
            base_url: "https://api.example.com".into(),
            pairs: vec![ModelKeyPair { model: "m".into(), api_key: "k".into() }],
            cache_enabled: true,
            default_webhook_secret: None,
            batch_size: 10,
        };

        let worker = Worker::new(store.clone(), queue.clone(), pipeline, blobs, config);
        (worker, store, queue, dir)
    }

    #[tokio::test]
    async fn processes_a_queued_job_through_to_completion() {
        let browser: Arc<dyn crate::browser::BrowserAdapter> = Arc::new(MockBrowserAdapter::ok("page body"));
        let llm: Arc<dyn crate::llm::LlmAdapter> = Arc::new(MockLlmAdapter::new(serde_json::json!({"title": "Example"}), 20));
        let (worker, store, queue, _dir) = harness(browser, llm).await;

        store.create_job("job-1", None, "https://example.com", &sample_params(false), None, None).await.unwrap();
        queue.enqueue("job-1").await.unwrap();

        let processed = worker.run_once().await.unwrap();
        assert_eq!(processed, 1);

        let job = store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.result_path.as_deref(), Some("results/job-1.json"));
        assert_eq!(job.token_usage, Some(20));
    }

    #[tokio::test]
    async fn blocked_render_marks_the_job_blocked() {
        let browser: Arc<dyn crate::browser::BrowserAdapter> = Arc::new(MockBrowserAdapter::blocked());
        let llm: Arc<dyn crate::llm::LlmAdapter> = Arc::new(MockLlmAdapter::new(serde_json::json!({}), 0));
        let (worker, store, queue, _dir) = harness(browser, llm).await;

        store.create_job("job-2", None, "https://example.com", &sample_params(true), None, None).await.unwrap();
        queue.enqueue("job-2").await.unwrap();

        worker.run_once().await.unwrap();

        let job = store.get_job("job-2").await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Blocked);
        assert!(job.blocked);
    }

    #[test]
    fn model_key_pairs_cross_models_with_keys() {
        let provider = ProviderConfig {
            api_key: Some(ConfigValue::Literal("primary-key".into())),
            base_url: None,
            default_model: Some("gpt-4o-mini".into()),
            fallback_models: vec!["gpt-4o".into()],
            api_keys: vec![ConfigValue::Literal("secondary-key".into())],
        };

        let pairs = build_model_key_pairs(&provider).unwrap();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0].model, "gpt-4o-mini");
        assert_eq!(pairs[0].api_key, "primary-key");
        assert_eq!(pairs[2].model, "gpt-4o");
    }

    #[test]
    fn model_key_pairs_errors_without_a_default_model() {
        let provider = ProviderConfig {
            api_key: Some(ConfigValue::Literal("k".into())),
            base_url: None,
            default_model: None,
            fallback_models: vec![],
            api_keys: vec![],
        };
        assert!(build_model_key_pairs(&provider).is_err());
    }
}
