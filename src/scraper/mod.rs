pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::{AppConfig, WorkType};
use crate::models::PurchaseRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use self::cleaner::raw_row_to_record;
use self::http_client::{FetchError, HttpClient};
use self::parsers::{parse_detail_genres, parse_page_count, parse_purchase_rows, Selectors};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Anything that can turn a URL into page text.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

// ── Purchase history scraper ──────────────────────────────────────────────────

/// Fetch + extract for one storefront's purchase history. Cheap to clone;
/// page tasks each hold their own handle.
#[derive(Clone)]
pub struct PurchaseHistoryScraper {
    source: Arc<dyn PageSource>,
    selectors: Arc<Selectors>,
    detail_permits: Arc<Semaphore>,
    detail_timeout: Duration,
    history_url: String,
}

impl PurchaseHistoryScraper {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = HttpClient::new(&config.scraper)?;
        Self::with_source(config, Arc::new(client))
    }

    pub fn with_source(config: &AppConfig, source: Arc<dyn PageSource>) -> Result<Self> {
        let selectors = Selectors::compile(&config.selectors).context("Bad [selectors] configuration")?;
        Ok(Self {
            source,
            selectors: Arc::new(selectors),
            detail_permits: Arc::new(Semaphore::new(config.pipeline.detail_concurrency.max(1))),
            detail_timeout: Duration::from_millis(config.pipeline.detail_timeout_ms),
            history_url: expand_template(&config.scraper.history_url, config.pipeline.work_type),
        })
    }

    /// URL of one history page, 1-based.
    pub fn page_url(&self, page: u32) -> String {
        format!("{}{}", self.history_url, page)
    }

    /// Fetch boundary: failures are logged into `errors` and come back as an
    /// empty page, so callers treat "no data" uniformly.
    pub async fn fetch_or_log(&self, url: &str, label: &str, errors: &mut Vec<String>) -> String {
        match self.source.fetch(url).await {
            Ok(text) => text,
            Err(e) => {
                warn!("{}: {}", label, e);
                errors.push(format!("{}: {}", label, e));
                String::new()
            }
        }
    }

    pub fn page_count(&self, markup: &str) -> Option<u32> {
        parse_page_count(markup, &self.selectors)
    }

    /// Turn one history page into records. Rows missing a title or date are
    /// logged and skipped.
    pub fn extract(
        &self,
        page_url: &str,
        markup: &str,
        label: &str,
        errors: &mut Vec<String>,
    ) -> Vec<PurchaseRecord> {
        if markup.trim().is_empty() {
            return Vec::new();
        }

        let base = match Url::parse(page_url) {
            Ok(u) => u,
            Err(e) => {
                errors.push(format!("{}: bad page url {:?}: {}", label, page_url, e));
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for (i, raw) in parse_purchase_rows(markup, &self.selectors).iter().enumerate() {
            match raw_row_to_record(raw, &base) {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    warn!("{}: row {}: {}", label, i + 1, e);
                    errors.push(format!("{}: row {}: {}", label, i + 1, e));
                }
            }
        }
        debug!("{}: {} records", label, records.len());
        records
    }

    /// Detail mode: visit each listed work's own page for its genre tags.
    /// Every fetch has its own deadline; a failed or late detail page only
    /// leaves that record's `detail_genres` empty.
    pub async fn fill_detail_genres(
        &self,
        records: &mut [PurchaseRecord],
        label: &str,
        errors: &mut Vec<String>,
    ) {
        let mut tasks = JoinSet::new();

        for (i, rec) in records.iter().enumerate() {
            if rec.is_delisted() {
                continue;
            }
            let scraper = self.clone();
            let url = rec.source_url.clone();
            let detail_label = format!("{} detail {}", label, url);

            tasks.spawn(async move {
                let mut errs = Vec::new();
                let Ok(_permit) = scraper.detail_permits.acquire().await else {
                    return (i, Vec::new(), errs);
                };
                let deadline = scraper.detail_timeout;
                let fetched = tokio::time::timeout(deadline, scraper.fetch_or_log(&url, &detail_label, &mut errs)).await;
                let genres = match fetched {
                    Ok(html) => parse_detail_genres(&html, &scraper.selectors),
                    Err(_) => {
                        warn!("{}: timed out after {:?}", detail_label, deadline);
                        errs.push(format!("{}: timed out after {:?}", detail_label, deadline));
                        Vec::new()
                    }
                };
                (i, genres, errs)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, genres, errs)) => {
                    records[i].detail_genres = genres;
                    errors.extend(errs);
                }
                Err(e) => errors.push(format!("{}: detail task failed: {}", label, e)),
            }
        }
    }
}

/// Substitute the work-type code into the history URL template.
fn expand_template(template: &str, work_type: WorkType) -> String {
    template.replace("{type}", work_type.code())
}
