use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub selectors: SelectorConfig,
}

/// HTTP / site access configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Purchase-history URL template. `{type}` is replaced with the work-type
    /// code and the page number is appended.
    #[serde(default = "default_history_url")]
    pub history_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Raw `Cookie` header of an existing logged-in session.
    #[serde(default)]
    pub cookie: Option<String>,
}

/// Orchestration configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub detail_mode: bool,

    #[serde(default)]
    pub work_type: WorkType,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_detail_concurrency")]
    pub detail_concurrency: usize,

    /// Covers one listing page: its fetch and row extraction.
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,

    /// Covers one detail-page fetch in detail mode.
    #[serde(default = "default_detail_timeout_ms")]
    pub detail_timeout_ms: u64,

    /// Upper bound on the page count read off the pager.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

/// Report / export configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Source-currency units per one unit of the converted currency.
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: f64,

    #[serde(default = "default_converted_currency")]
    pub converted_currency: String,

    #[serde(default)]
    pub min_count: u64,

    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

/// CSS selectors describing the purchase-history markup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectorConfig {
    #[serde(default = "default_row_selector")]
    pub row: String,
    #[serde(default = "default_title_selector")]
    pub title: String,
    #[serde(default = "default_title_link_selector")]
    pub title_link: String,
    #[serde(default = "default_date_selector")]
    pub date: String,
    #[serde(default = "default_genre_selector")]
    pub genre: String,
    #[serde(default = "default_genre_link_selector")]
    pub genre_link: String,
    #[serde(default = "default_price_selector")]
    pub price: String,
    #[serde(default = "default_maker_selector")]
    pub maker: String,
    #[serde(default = "default_maker_link_selector")]
    pub maker_link: String,
    #[serde(default = "default_page_count_selector")]
    pub page_count: String,
    #[serde(default = "default_page_count_attr")]
    pub page_count_attr: String,
    #[serde(default = "default_detail_genre_selector")]
    pub detail_genre: String,
}

/// Site category codes accepted by the purchase-history filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkType {
    #[default]
    All,
    Game,
    Comic,
    Cg,
    Novel,
    Voice,
    Video,
    Music,
    Tool,
    Other,
}

impl WorkType {
    pub fn code(self) -> &'static str {
        match self {
            WorkType::All => "all",
            WorkType::Game => "game",
            WorkType::Comic => "comic",
            WorkType::Cg => "cg",
            WorkType::Novel => "novel",
            WorkType::Voice => "voice",
            WorkType::Video => "video",
            WorkType::Music => "music",
            WorkType::Tool => "tool",
            WorkType::Other => "other",
        }
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_history_url() -> String {
    "https://www.dlsite.com/maniax/mypage/userbuy/=/type/{type}/start/all/sort/1/order/1/page/"
        .to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    "purchase-stats/0.1 (personal purchase history summary)".to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_detail_concurrency() -> usize {
    4
}
fn default_page_timeout_ms() -> u64 {
    120_000
}
fn default_detail_timeout_ms() -> u64 {
    30_000
}
fn default_max_pages() -> u32 {
    500
}
fn default_exchange_rate() -> f64 {
    150.0
}
fn default_converted_currency() -> String {
    "USD".to_string()
}
fn default_export_dir() -> PathBuf {
    PathBuf::from("reports")
}
fn default_row_selector() -> String {
    "table.work_list_main tr".to_string()
}
fn default_title_selector() -> String {
    ".work_name".to_string()
}
fn default_title_link_selector() -> String {
    ".work_name a".to_string()
}
fn default_date_selector() -> String {
    ".buy_date".to_string()
}
fn default_genre_selector() -> String {
    ".work_genre".to_string()
}
fn default_genre_link_selector() -> String {
    ".work_genre a".to_string()
}
fn default_price_selector() -> String {
    ".work_price".to_string()
}
fn default_maker_selector() -> String {
    ".maker_name".to_string()
}
fn default_maker_link_selector() -> String {
    ".maker_name a".to_string()
}
fn default_page_count_selector() -> String {
    ".page_no ul li:last-child a".to_string()
}
fn default_page_count_attr() -> String {
    "data-value".to_string()
}
fn default_detail_genre_selector() -> String {
    ".main_genre a".to_string()
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            history_url: default_history_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            user_agent: default_user_agent(),
            cookie: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detail_mode: false,
            work_type: WorkType::default(),
            concurrency: default_concurrency(),
            detail_concurrency: default_detail_concurrency(),
            page_timeout_ms: default_page_timeout_ms(),
            detail_timeout_ms: default_detail_timeout_ms(),
            max_pages: default_max_pages(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            exchange_rate: default_exchange_rate(),
            converted_currency: default_converted_currency(),
            min_count: 0,
            export_dir: default_export_dir(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            row: default_row_selector(),
            title: default_title_selector(),
            title_link: default_title_link_selector(),
            date: default_date_selector(),
            genre: default_genre_selector(),
            genre_link: default_genre_link_selector(),
            price: default_price_selector(),
            maker: default_maker_selector(),
            maker_link: default_maker_link_selector(),
            page_count: default_page_count_selector(),
            page_count_attr: default_page_count_attr(),
            detail_genre: default_detail_genre_selector(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("PSTATS").separator("__"))
            .build()
            .context("Failed to read configuration sources")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.report.exchange_rate.is_finite() && self.report.exchange_rate > 0.0,
            "report.exchange_rate must be a positive number (got {})",
            self.report.exchange_rate
        );
        ensure!(self.pipeline.concurrency >= 1, "pipeline.concurrency must be at least 1");
        ensure!(
            self.pipeline.detail_concurrency >= 1,
            "pipeline.detail_concurrency must be at least 1"
        );
        ensure!(self.pipeline.max_pages >= 1, "pipeline.max_pages must be at least 1");
        ensure!(
            self.scraper.history_url.starts_with("http://")
                || self.scraper.history_url.starts_with("https://"),
            "scraper.history_url must be an http(s) URL"
        );
        Ok(())
    }
}
