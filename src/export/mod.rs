//! Report renderers: plain-text, sectioned CSV and the JSON document that
//! `loader` can read back.

use crate::config::ReportConfig;
use crate::models::RunResult;
use crate::report::{RankedEntry, Report};
use crate::utils::{fmt_number, fmt_yen};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Text,
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

const FILE_STEM: &str = "purchase-report";

// ── Structured text ───────────────────────────────────────────────────────────

fn ranking_table(f: &mut fmt::Formatter<'_>, title: &str, entries: &[RankedEntry], min_count: u64) -> fmt::Result {
    writeln!(f, "\n{} ({} shown, min count {})", title, entries.len(), min_count)?;
    let width = entries.iter().map(|e| e.key.chars().count()).max().unwrap_or(0).max(4);
    for (i, e) in entries.iter().enumerate() {
        let key = if e.key.is_empty() { "(none)" } else { e.key.as_str() };
        writeln!(f, "  {:>3}. {:<width$}  {:>5}", i + 1, key, e.count, width = width)?;
    }
    Ok(())
}

/// Human-readable layout of a [`Report`].
struct TextReport<'a>(&'a Report);

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let s = &report.summary;
        let day_or_dash = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or("—".into());

        writeln!(f, "─────────────────────────────────────────")?;
        writeln!(f, "  Purchase history summary")?;
        writeln!(f, "─────────────────────────────────────────")?;
        writeln!(f, "  Items      : {}", fmt_number(s.total_items as i64))?;
        writeln!(f, "  Spent      : {}", fmt_yen(s.total_price))?;
        writeln!(
            f,
            "  Converted  : {:.2} {} (rate {})",
            s.converted_total, s.converted_currency, s.exchange_rate
        )?;
        writeln!(f, "  Delisted   : {}", s.delisted)?;
        writeln!(f, "  Genres     : {}", s.distinct_genres)?;
        writeln!(f, "  Makers     : {}", s.distinct_makers)?;
        writeln!(f, "  From       : {}", day_or_dash(s.first_purchase))?;
        writeln!(f, "  To         : {}", day_or_dash(s.last_purchase))?;
        if s.cancelled {
            writeln!(f, "  (run was cancelled, figures are partial)")?;
        }
        writeln!(f, "─────────────────────────────────────────")?;

        ranking_table(f, "Genres", &report.genres, report.min_count)?;
        ranking_table(f, "Makers", &report.makers, report.min_count)?;

        writeln!(f, "\nDelisted works ({})", report.delisted.len())?;
        for d in &report.delisted {
            writeln!(f, "  {}  {}  [{}]  {}", d.day, d.title, d.maker, fmt_yen(d.price))?;
        }

        writeln!(f, "\nTimeline")?;
        let mut spend = report.cumulative_spend.iter();
        for day in &report.timeline {
            let running = spend.next().map(|(_, total)| *total).unwrap_or_default();
            writeln!(f, "  {}  (running total {})", day.day, fmt_yen(running))?;
            for p in &day.purchases {
                writeln!(f, "      {}  [{}]  {}", p.title, p.maker, fmt_yen(p.price))?;
            }
        }

        if !report.errors.is_empty() {
            writeln!(f, "\nErrors ({})", report.errors.len())?;
            for e in &report.errors {
                writeln!(f, "  - {}", e)?;
            }
        }
        Ok(())
    }
}

/// Human-readable report; also what the CLI prints.
pub fn render_text(report: &Report) -> String {
    TextReport(report).to_string()
}

// ── Delimited text ────────────────────────────────────────────────────────────

/// Sectioned CSV: the first column names the section, the rest depend on it.
pub fn write_csv<W: Write>(report: &Report, writer: W) -> Result<()> {
    let mut w = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    let s = &report.summary;

    w.write_record(["section", "field_1", "field_2", "field_3", "field_4"])?;
    for (name, value) in [
        ("total_items", s.total_items.to_string()),
        ("total_price", s.total_price.to_string()),
        ("converted_total", format!("{:.2}", s.converted_total)),
        ("converted_currency", s.converted_currency.clone()),
        ("exchange_rate", s.exchange_rate.to_string()),
        ("delisted", s.delisted.to_string()),
        ("errors", s.errors.to_string()),
    ] {
        w.write_record(["summary", name, value.as_str()])?;
    }

    for (section, entries) in [("genre", &report.genres), ("maker", &report.makers)] {
        for e in entries {
            w.write_record([section, &e.key, &e.count.to_string(), e.link.as_deref().unwrap_or("")])?;
        }
    }

    for d in &report.delisted {
        w.write_record(["delisted", &d.day.to_string(), &d.title, &d.maker, &d.price.to_string()])?;
    }

    for day in &report.timeline {
        let day_str = day.day.to_string();
        for p in &day.purchases {
            w.write_record(["timeline", &day_str, &p.title, &p.maker, &p.price.to_string()])?;
        }
    }

    for (day, total) in &report.cumulative_spend {
        w.write_record(["cumulative", &day.to_string(), &total.to_string()])?;
    }

    for e in &report.errors {
        w.write_record(["error", e.as_str()])?;
    }

    w.flush()?;
    Ok(())
}

// ── Structured document ───────────────────────────────────────────────────────

/// The JSON export. `result` is the source of truth; `report` is what the
/// run looked like when exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub generated_at: NaiveDateTime,
    pub exchange_rate: f64,
    pub converted_currency: String,
    pub min_count: u64,
    pub result: RunResult,
    pub report: Report,
}

impl ExportDocument {
    pub fn new(result: &RunResult, report: &Report, cfg: &ReportConfig) -> Self {
        Self {
            generated_at: Utc::now().naive_utc(),
            exchange_rate: cfg.exchange_rate,
            converted_currency: cfg.converted_currency.clone(),
            min_count: cfg.min_count,
            result: result.clone(),
            report: report.clone(),
        }
    }
}

pub fn write_json<W: Write>(doc: &ExportDocument, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, doc).context("Failed to serialise export document")?;
    Ok(())
}

// ── Files ─────────────────────────────────────────────────────────────────────

/// Write one file per requested format into `dir`. Returns the paths written.
pub fn export_all(
    result: &RunResult,
    report: &Report,
    cfg: &ReportConfig,
    dir: &Path,
    formats: &[ExportFormat],
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Could not create dir {:?}", dir))?;

    let mut written = Vec::new();
    for format in formats {
        let path = dir.join(format!("{}.{}", FILE_STEM, format.extension()));
        let file = File::create(&path).with_context(|| format!("Could not create {:?}", path))?;

        match format {
            ExportFormat::Text => {
                let mut file = file;
                file.write_all(render_text(report).as_bytes())?;
            }
            ExportFormat::Csv => write_csv(report, file)?,
            ExportFormat::Json => write_json(&ExportDocument::new(result, report, cfg), file)?,
        }

        info!("Wrote {:?}", path);
        written.push(path);
    }
    Ok(written)
}
