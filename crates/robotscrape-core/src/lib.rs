//! # robotscrape-core
//!
//! Core library for robotscrape - an AI-assisted web extraction service.
//!
//! Given a URL and a description of the fields to extract, this crate
//! renders the page through a headless-browser adapter, distills it down to
//! LLM-ready text, and calls a configured model to produce structured JSON.
//! Results can be returned synchronously or dispatched as an asynchronous
//! job delivered later over a webhook.
//!
//! ## Quick Start
//!
//! ```ignore
//! use robotscrape_core::{RobotScrape, resolve_config, ExtractParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = resolve_config(None)?;
//!     let robot = RobotScrape::from_config(config).await?;
//!
//!     let params = ExtractParams {
//!         url: "https://example.com".to_string(),
//!         fields: vec!["title".to_string()],
//!         schema: None,
//!         instructions: None,
//!         options: Default::default(),
//!     };
//!     let outcome = robot.extract_sync(&params).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! - [`browser`]: headless-render client and content distillation
//! - [`llm`]: provider-agnostic extraction adapter with model/key fallback
//! - [`pipeline`]: the cache-then-render-then-extract orchestration shared
//!   by the synchronous and asynchronous paths
//! - [`worker`]: the queue-consuming worker loop
//! - [`schedule`]: cron-driven recurring extractions
//! - [`webhook`]: SSRF-checked, HMAC-signed delivery with retry and dead-lettering
//! - [`store`]: the tabular store backing jobs, schedules, cache, and logs
//! - [`janitor`]: periodic retention cleanup

pub mod auth;
pub mod blob;
pub mod browser;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod crypto;
pub mod error;
pub mod janitor;
pub mod llm;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;
pub mod schedule;
pub mod security;
pub mod store;
pub mod types;
pub mod webhook;
pub mod worker;

pub use auth::Authorized;
pub use config::{resolve_config, Config, RobotScrapeConfig};
pub use error::{Error, Result};
pub use types::*;

use std::sync::Arc;

use blob::{BlobStore, LocalBlobStore};
use browser::{BrowserAdapter, HttpBrowserAdapter};
use cache::ResultCache;
use circuit_breaker::CircuitBreakerRegistry;
use llm::{HttpLlmAdapter, LlmAdapter, ModelKeyPair};
use pipeline::{Pipeline, PipelineOutcome, ProviderSelection};
use queue::{JobQueue, StoreJobQueue};
use rate_limit::{RateLimitDecision, RateLimiter};
use store::Store;
use worker::{Worker, WorkerConfig};

const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_CIRCUIT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS: i64 = 300;
const DEFAULT_WORKER_BATCH_SIZE: usize = 10;

/// Main entry point for robotscrape functionality. Wires together the
/// store, blob store, extraction pipeline, queue, and rate limiter from a
/// single resolved configuration.
pub struct RobotScrape {
    config: RobotScrapeConfig,
    store: Store,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<Pipeline>,
    rate_limiter: RateLimiter,
    provider_name: String,
    provider_base_url: String,
    provider_pairs: Vec<ModelKeyPair>,
}

impl RobotScrape {
    /// Build a `RobotScrape` from configuration: connects to the store,
    /// applies pending migrations, and constructs the browser, LLM, and
    /// cache adapters behind the shared extraction pipeline.
    pub async fn from_config(config: RobotScrapeConfig) -> Result<Self> {
        let store = Store::connect(&config.store.url).await?;
        store.migrate().await?;

        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(config.blob_store.root.clone()));

        let (provider_name, provider) = config
            .providers
            .iter()
            .next()
            .map(|(name, cfg)| (name.clone(), cfg.clone()))
            .ok_or_else(|| Error::Config("no [providers.*] configured".to_string()))?;
        let provider_pairs = worker::build_model_key_pairs(&provider)?;
        let provider_base_url = provider
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let breakers = Arc::new(CircuitBreakerRegistry::new(
            DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            DEFAULT_CIRCUIT_COOLDOWN_SECS,
        ));
        let llm: Arc<dyn LlmAdapter> = Arc::new(HttpLlmAdapter::new(breakers));

        let browser: Arc<dyn BrowserAdapter> = Arc::new(HttpBrowserAdapter::new(
            config.browser.render_endpoint.clone(),
            config.browser.default_timeout_ms,
        ));
        let fallback_browser = config
            .fallback_browser
            .as_ref()
            .filter(|f| f.enabled)
            .and_then(|f| f.url.clone())
            .map(|url| Arc::new(HttpBrowserAdapter::new(url, config.browser.default_timeout_ms)) as Arc<dyn BrowserAdapter>);

        let cache = Arc::new(ResultCache::new(store.clone(), blobs.clone(), config.cache.ttl_secs));
        let pipeline = Arc::new(Pipeline::new(
            cache,
            browser,
            fallback_browser,
            llm,
            config.browser.max_content_chars,
        ));

        let queue: Arc<dyn JobQueue> = Arc::new(StoreJobQueue::new(store.clone(), DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS));
        let rate_limiter = RateLimiter::new(
            store.clone(),
            config.rate_limit.anonymous_per_minute,
            config.rate_limit.authenticated_per_minute,
        );

        Ok(Self {
            config,
            store,
            blobs,
            queue,
            pipeline,
            rate_limiter,
            provider_name,
            provider_base_url,
            provider_pairs,
        })
    }

    pub fn config(&self) -> &RobotScrapeConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    fn provider_selection(&self) -> ProviderSelection<'_> {
        ProviderSelection {
            provider: &self.provider_name,
            base_url: &self.provider_base_url,
            pairs: &self.provider_pairs,
        }
    }

    /// Run an extraction synchronously and return its outcome. Does not
    /// create a job row - the caller owns turning this into an HTTP response.
    pub async fn extract_sync(&self, params: &ExtractParams) -> Result<PipelineOutcome> {
        self.pipeline.run(params, self.provider_selection(), self.config.cache.enabled).await
    }

    /// Persist a job row and enqueue it for asynchronous processing,
    /// returning the new job's id.
    pub async fn submit_job(
        &self,
        api_key_id: Option<&str>,
        params: &ExtractParams,
        webhook_url: Option<&str>,
        webhook_secret: Option<&str>,
    ) -> Result<String> {
        let job_id = uuid::Uuid::new_v4().to_string();
        self.store
            .create_job(&job_id, api_key_id, &params.url, params, webhook_url, webhook_secret)
            .await?;
        self.queue.enqueue(&job_id).await?;
        Ok(job_id)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn list_jobs(&self, api_key_id: Option<&str>, status: Option<JobStatus>, limit: i64) -> Result<Vec<Job>> {
        self.store.list_jobs(api_key_id, status, limit).await
    }

    /// Look up a raw API key and atomically deduct `cost` credits.
    pub async fn authorize_and_consume(&self, raw_key: &str, cost: i64) -> Result<Authorized> {
        auth::authorize_and_consume(&self.store, raw_key, cost).await
    }

    /// Look up a raw API key without touching credits.
    pub async fn verify_key(&self, raw_key: &str) -> Result<ApiKey> {
        auth::verify(&self.store, raw_key).await
    }

    pub async fn issue_api_key(&self, owner: &str, tier: &str, credits: i64) -> Result<(String, ApiKey)> {
        auth::issue_api_key(&self.store, owner, tier, credits).await
    }

    pub async fn check_rate_limit(&self, identifier: &str, authenticated: bool) -> Result<RateLimitDecision> {
        self.rate_limiter.check(identifier, authenticated).await
    }

    /// Resolve the configured webhook secret, if any, reading from the
    /// environment if it is an `env:` indirection.
    pub fn default_webhook_secret(&self) -> Option<String> {
        self.config
            .webhooks
            .as_ref()
            .and_then(|w| w.secret.as_ref())
            .and_then(|s| s.resolve().ok())
    }

    /// Build a `Worker` sharing this instance's store, queue, and pipeline,
    /// ready for the CLI's `worker` subcommand to drive in a poll loop.
    pub fn worker(&self) -> Worker {
        Worker::new(
            self.store.clone(),
            self.queue.clone(),
            self.pipeline.clone(),
            self.blobs.clone(),
            WorkerConfig {
                provider_name: self.provider_name.clone(),
                base_url: self.provider_base_url.clone(),
                pairs: self.provider_pairs.clone(),
                cache_enabled: self.config.cache.enabled,
                default_webhook_secret: self.default_webhook_secret(),
                batch_size: DEFAULT_WORKER_BATCH_SIZE,
            },
        )
    }

    /// Build a `Janitor` over this instance's store, for the CLI's periodic
    /// retention cleanup.
    pub fn janitor(&self, log_retention_days: i64) -> janitor::Janitor {
        janitor::Janitor::new(self.store.clone(), log_retention_days)
    }
}
