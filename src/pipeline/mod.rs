//! Pipeline orchestrator: ties scraper → aggregator together for one run.
//!
//! ## Phases
//!
//! `Idle → FetchingFirstPage → FetchingRemainder → Settled`
//!
//!   1. Fetch page 1, read the page count off the pager (missing → 1, capped at
//!      `pipeline.max_pages`), merge it.
//!   2. Spawn pages 2..=total on a bounded pool. Each page's listing fetch and
//!      extraction run under the page timeout; detail fetches carry their own.
//!   3. Merge pages as they settle, in completion order. One failed page never
//!      cancels its siblings; the run resolves once every page has settled.
//!
//! Cancelling the token settles every outstanding page as "cancelled" and
//! returns whatever was merged so far.

use crate::aggregate::PageOutcome;
use crate::config::AppConfig;
use crate::models::RunResult;
use crate::scraper::{PageSource, PurchaseHistoryScraper};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ── Progress events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    FetchingFirstPage,
    FetchingRemainder,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Phase(RunPhase),
    PageSettled {
        page: u32,
        total: u32,
        records: usize,
        failed: bool,
    },
}

/// Where progress goes. Silent when nobody subscribed.
#[derive(Debug, Clone, Default)]
pub struct Progress(Option<UnboundedSender<ProgressEvent>>);

impl Progress {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self(Some(tx))
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    scraper: PurchaseHistoryScraper,
    concurrency: usize,
    page_timeout: Duration,
    max_pages: u32,
}

impl Pipeline {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let scraper = PurchaseHistoryScraper::new(config).context("Failed to build scraper")?;
        Ok(Self::from_scraper(config, scraper))
    }

    pub fn with_source(config: &AppConfig, source: Arc<dyn PageSource>) -> Result<Self> {
        let scraper = PurchaseHistoryScraper::with_source(config, source)?;
        Ok(Self::from_scraper(config, scraper))
    }

    fn from_scraper(config: &AppConfig, scraper: PurchaseHistoryScraper) -> Self {
        Self {
            scraper,
            concurrency: config.pipeline.concurrency.max(1),
            page_timeout: Duration::from_millis(config.pipeline.page_timeout_ms),
            max_pages: config.pipeline.max_pages.max(1),
        }
    }

    pub async fn run(&self, detail_mode: bool, progress: &Progress, cancel: &CancellationToken) -> RunResult {
        let mut result = RunResult::default();
        progress.emit(ProgressEvent::Phase(RunPhase::Idle));

        // ── 1. First page: records + page count ───────────────────────────────
        progress.emit(ProgressEvent::Phase(RunPhase::FetchingFirstPage));
        info!("Fetching history page 1 ({})", self.scraper.page_url(1));

        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = scrape_page(&self.scraper, 1, detail_mode, self.page_timeout) => Some(outcome),
        };
        let Some((first, pager)) = first else {
            result.log_error("page 1: cancelled");
            result.cancelled = true;
            progress.emit(ProgressEvent::Phase(RunPhase::Settled));
            return result;
        };
        let total = self.page_total(pager);

        let failed = first.failed;
        let n = result.absorb(first);
        progress.emit(ProgressEvent::PageSettled {
            page: 1,
            total,
            records: n,
            failed,
        });
        info!("Page 1/{}: {} records", total, n);

        // ── 2. Remaining pages on a bounded pool ──────────────────────────────
        progress.emit(ProgressEvent::Phase(RunPhase::FetchingRemainder));
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for page in 2..=total {
            let scraper = self.scraper.clone();
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            let timeout = self.page_timeout;

            tasks.spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => PageOutcome::cancelled(page),
                    outcome = async {
                        let Ok(_permit) = permits.acquire_owned().await else {
                            return PageOutcome::abandoned(page, format!("page {}: worker pool closed", page));
                        };
                        scrape_page(&scraper, page, detail_mode, timeout).await.0
                    } => outcome,
                }
            });
        }

        // ── 3. All-settled join ───────────────────────────────────────────────
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    let page = outcome.page;
                    let failed = outcome.failed;
                    if failed {
                        warn!("Page {}/{} failed", page, total);
                    }
                    result.cancelled |= outcome.cancelled;
                    let n = result.absorb(outcome);
                    debug!("Page {}/{}: {} records", page, total, n);
                    progress.emit(ProgressEvent::PageSettled {
                        page,
                        total,
                        records: n,
                        failed,
                    });
                }
                Err(e) => {
                    error!("Page task panic: {}", e);
                    result.log_error(format!("page task aborted: {}", e));
                }
            }
        }

        progress.emit(ProgressEvent::Phase(RunPhase::Settled));
        info!(
            "Run settled: {} pages | {} items | {} genre tags | {} errors{}",
            total,
            result.total_items,
            result.genre_counts.total(),
            result.errors.len(),
            if result.cancelled { " | cancelled" } else { "" }
        );

        result
    }

    /// Pager value read off page 1: missing means one page, anything past
    /// `max_pages` is capped.
    fn page_total(&self, pager: Option<u32>) -> u32 {
        match pager {
            None => {
                debug!("No usable page count on page 1, assuming a single page");
                1
            }
            Some(n) if n > self.max_pages => {
                warn!("Pager claims {} pages, capping at pipeline.max_pages={}", n, self.max_pages);
                self.max_pages
            }
            Some(n) => n,
        }
    }
}

/// Scrape one history page. Never fails; problems land in `errors`.
///
/// The listing fetch and row extraction run under `timeout`. Detail fetches
/// happen afterwards under their own deadline, so the page's rows are kept
/// whatever happens to them. The pager is only read on page 1.
async fn scrape_page(
    scraper: &PurchaseHistoryScraper,
    page: u32,
    detail_mode: bool,
    timeout: Duration,
) -> (PageOutcome, Option<u32>) {
    let label = format!("page {}", page);
    let url = scraper.page_url(page);

    let listing = async {
        let mut errors = Vec::new();
        let markup = scraper.fetch_or_log(&url, &label, &mut errors).await;
        let failed = markup.is_empty() && !errors.is_empty();
        let pager = if page == 1 { scraper.page_count(&markup) } else { None };
        let records = scraper.extract(&url, &markup, &label, &mut errors);
        (
            PageOutcome {
                page,
                records,
                errors,
                failed,
                cancelled: false,
            },
            pager,
        )
    };

    let (mut outcome, pager) = match tokio::time::timeout(timeout, listing).await {
        Ok(done) => done,
        Err(_) => {
            warn!("{}: timed out after {:?}", label, timeout);
            let msg = format!("{}: timed out after {:?}", label, timeout);
            return (PageOutcome::abandoned(page, msg), None);
        }
    };

    if detail_mode && !outcome.records.is_empty() {
        scraper
            .fill_detail_genres(&mut outcome.records, &label, &mut outcome.errors)
            .await;
    }
    (outcome, pager)
}

impl PageOutcome {
    fn abandoned(page: u32, message: String) -> Self {
        Self {
            page,
            records: Vec::new(),
            errors: vec![message],
            failed: true,
            cancelled: false,
        }
    }

    fn cancelled(page: u32) -> Self {
        Self {
            cancelled: true,
            ..Self::abandoned(page, format!("page {}: cancelled", page))
        }
    }
}
