mod aggregate;
mod config;
mod export;
mod loader;
mod models;
mod pipeline;
mod report;
mod scraper;
mod utils;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, WorkType};
use crate::export::{export_all, render_text, ExportFormat};
use crate::loader::{load_export, resolve_export_path};
use crate::pipeline::{Pipeline, Progress, ProgressEvent, RunPhase};
use crate::report::Report;

#[derive(Parser)]
#[command(name = "purchase-stats", about = "Purchase history statistics", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the purchase history and print / export the report
    Scrape {
        /// Visit every work's own page for its genre tags
        #[arg(long)]
        detail: bool,

        /// Category filter applied to the history listing
        #[arg(long = "type", value_enum)]
        work_type: Option<WorkType>,

        /// Pages fetched at once
        #[arg(long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Rebuild the report from a previous JSON export
    Report {
        /// Export file, or the directory holding purchase-report.json
        input: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct OutputArgs {
    /// Source-currency units per converted unit
    #[arg(long)]
    rate: Option<f64>,

    /// Hide ranking entries below this count
    #[arg(long)]
    min_count: Option<u64>,

    /// Directory for exported files
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Export formats (repeatable); nothing is written without one
    #[arg(short, long, value_enum)]
    format: Vec<ExportFormat>,
}

impl OutputArgs {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(rate) = self.rate {
            config.report.exchange_rate = rate;
        }
        if let Some(n) = self.min_count {
            config.report.min_count = n;
        }
        if let Some(dir) = &self.out {
            config.report.export_dir = dir.clone();
        }
        config.validate()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "purchase_stats=info,warn",
        1 => "purchase_stats=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Scrape {
            detail,
            work_type,
            concurrency,
            output,
        } => {
            output.apply(&mut config)?;
            config.pipeline.detail_mode |= detail;
            if let Some(t) = work_type {
                config.pipeline.work_type = t;
            }
            if let Some(c) = concurrency {
                config.pipeline.concurrency = c;
            }
            config.validate()?;

            let _t = utils::Timer::start("Scrape");
            let pipeline = Pipeline::new(&config)?;

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, settling outstanding pages…");
                    on_ctrl_c.cancel();
                }
            });

            let (tx, rx) = mpsc::unbounded_channel();
            let listener = tokio::spawn(log_progress(rx));

            let result = pipeline
                .run(config.pipeline.detail_mode, &Progress::new(tx), &cancel)
                .await;
            listener.await.ok();

            let report = Report::build(&result, &config.report);
            print!("{}", render_text(&report));

            if !output.format.is_empty() {
                export_all(&result, &report, &config.report, &config.report.export_dir, &output.format)?;
            }
        }

        Command::Report { input, output } => {
            output.apply(&mut config)?;
            let doc = load_export(&resolve_export_path(&input)?)?;

            // the exported rate stands unless overridden
            if output.rate.is_none() {
                config.report.exchange_rate = doc.exchange_rate;
                config.report.converted_currency = doc.converted_currency.clone();
            }

            let report = Report::build(&doc.result, &config.report);
            print!("{}", render_text(&report));

            if !output.format.is_empty() {
                export_all(&doc.result, &report, &config.report, &config.report.export_dir, &output.format)?;
            }
        }

        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Progress subscriber: turns pipeline events into log lines. Ends when the
/// pipeline drops its sender.
async fn log_progress(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    let mut settled = 0u32;
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Phase(RunPhase::FetchingRemainder) => info!("Fetching remaining pages…"),
            ProgressEvent::Phase(_) => {}
            ProgressEvent::PageSettled {
                page,
                total,
                records,
                failed,
            } => {
                settled += 1;
                if failed {
                    warn!("[{}/{}] page {} failed", settled, total, page);
                } else {
                    info!("[{}/{}] page {}: {} records", settled, total, page, records);
                }
            }
        }
    }
}
