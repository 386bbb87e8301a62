//! Shared extraction orchestration: cache lookup, browser render with
//! fallback-on-block, and LLM extraction. Used identically by the
//! synchronous `/extract` handler and the queue worker so the two paths
//! can never drift on what "doing an extraction" means.

use std::sync::Arc;

use serde_json::Value;

use crate::blob::BlobStore;
use crate::browser::{BrowserAdapter, ScrapeResult};
use crate::cache::ResultCache;
use crate::error::Result;
use crate::llm::{LlmAdapter, ModelKeyPair};
use crate::types::ExtractParams;

/// The provider and ordered (model, key) fallback list to extract with.
pub struct ProviderSelection<'a> {
    pub provider: &'a str,
    pub base_url: &'a str,
    pub pairs: &'a [ModelKeyPair],
}

pub enum PipelineOutcome {
    CacheHit { data: Value, token_usage: i64 },
    Blocked { scrape: ScrapeResult },
    Completed { scrape: ScrapeResult, data: Value, token_usage: i64 },
}

pub struct Pipeline {
    cache: Arc<ResultCache>,
    browser: Arc<dyn BrowserAdapter>,
    fallback_browser: Option<Arc<dyn BrowserAdapter>>,
    llm: Arc<dyn LlmAdapter>,
    max_content_chars: usize,
}

impl Pipeline {
    pub fn new(
        cache: Arc<ResultCache>,
        browser: Arc<dyn BrowserAdapter>,
        fallback_browser: Option<Arc<dyn BrowserAdapter>>,
        llm: Arc<dyn LlmAdapter>,
        max_content_chars: usize,
    ) -> Self {
        Self {
            cache,
            browser,
            fallback_browser,
            llm,
            max_content_chars,
        }
    }

    /// Run one extraction: cache check, render (with fallback provider if
    /// the primary render comes back blocked), then LLM extraction. Cache
    /// writes are best-effort - a failure there never fails the extraction.
    pub async fn run(&self, params: &ExtractParams, selection: ProviderSelection<'_>, cache_enabled: bool) -> Result<PipelineOutcome> {
        if cache_enabled {
            if let Some(hit) = self.cache.lookup(params).await? {
                return Ok(PipelineOutcome::CacheHit {
                    data: hit.result,
                    token_usage: hit.token_usage,
                });
            }
        }

        let mut scrape = self.browser.render(&params.url, &params.options, self.max_content_chars).await?;

        if scrape.blocked {
            if let Some(fallback) = &self.fallback_browser {
                if let Ok(retry) = fallback.render(&params.url, &params.options, self.max_content_chars).await {
                    if !retry.blocked {
                        scrape = retry;
                    }
                }
            }
        }

        if scrape.blocked {
            return Ok(PipelineOutcome::Blocked { scrape });
        }

        let response = self
            .llm
            .extract_with_fallback(
                selection.provider,
                selection.base_url,
                selection.pairs,
                &scrape.content,
                &params.fields,
                params.schema.as_ref(),
                params.instructions.as_deref(),
            )
            .await?;

        let content_chars = scrape.content.chars().count() as i64;
        if cache_enabled {
            let _ = self.cache.store_result(params, &response.data, response.usage_tokens, content_chars).await;
        }

        Ok(PipelineOutcome::Completed {
            scrape,
            data: response.data,
            token_usage: response.usage_tokens,
        })
    }
}

/// Write the distilled content, and screenshot if present, under the given
/// id's `logs/` prefix - used when the caller requested `storeContent`.
pub async fn persist_snapshot(blobs: &dyn BlobStore, id: &str, scrape: &ScrapeResult) -> Result<Option<String>> {
    let content_key = format!("logs/{id}.txt");
    blobs.put(&content_key, scrape.content.as_bytes()).await?;

    if let (Some(bytes), Some(ext)) = (&scrape.screenshot, scrape.screenshot_type) {
        let screenshot_key = format!("logs/{id}.{ext}");
        blobs.put(&screenshot_key, bytes).await?;
    }

    Ok(Some(content_key))
}
