//! Read-only projections over a settled run. Every renderer and exporter
//! works from a `Report`, never from the raw records.

use crate::config::ReportConfig;
use crate::models::{CountTable, PurchaseRecord, RunResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Rankings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEntry {
    pub key: String,
    pub count: u64,
    pub link: Option<String>,
}

/// Descending by count; ties keep first-seen order. Entries under
/// `min_count` are dropped (0 keeps everything).
fn ranked(table: &CountTable, min_count: u64) -> Vec<RankedEntry> {
    let mut entries: Vec<RankedEntry> = table
        .iter()
        .filter(|(_, c)| c.count >= min_count)
        .map(|(key, c)| RankedEntry {
            key: key.to_string(),
            count: c.count,
            link: c.link.clone(),
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count));
    entries
}

pub fn ranked_genres(result: &RunResult, min_count: u64) -> Vec<RankedEntry> {
    ranked(&result.genre_counts, min_count)
}

pub fn ranked_makers(result: &RunResult, min_count: u64) -> Vec<RankedEntry> {
    ranked(&result.maker_counts, min_count)
}

// ── Timeline ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    pub title: String,
    pub maker: String,
    pub price: i64,
}

impl From<&PurchaseRecord> for TimelineEntry {
    fn from(r: &PurchaseRecord) -> Self {
        Self {
            title: r.title.clone(),
            maker: r.maker_name.clone(),
            price: r.price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineDay {
    pub day: NaiveDate,
    pub purchases: Vec<TimelineEntry>,
}

fn by_day(records: &[PurchaseRecord]) -> BTreeMap<NaiveDate, Vec<&PurchaseRecord>> {
    let mut days: BTreeMap<NaiveDate, Vec<&PurchaseRecord>> = BTreeMap::new();
    for r in records {
        days.entry(r.purchased_at.date()).or_default().push(r);
    }
    days
}

/// Purchases grouped by calendar day, oldest day first. Within a day,
/// records keep discovery order.
pub fn timeline(result: &RunResult) -> Vec<TimelineDay> {
    by_day(&result.records)
        .into_iter()
        .map(|(day, records)| TimelineDay {
            day,
            purchases: records.into_iter().map(TimelineEntry::from).collect(),
        })
        .collect()
}

/// Running spend at the end of each purchase day.
pub fn cumulative_spend(result: &RunResult) -> Vec<(NaiveDate, i64)> {
    let mut running = 0i64;
    by_day(&result.records)
        .into_iter()
        .map(|(day, records)| {
            running += records.iter().map(|r| r.price).filter(|p| *p > 0).sum::<i64>();
            (day, running)
        })
        .collect()
}

// ── Summary ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub total_items: u64,
    pub total_price: i64,
    pub converted_total: f64,
    pub converted_currency: String,
    pub exchange_rate: f64,
    pub delisted: usize,
    pub distinct_genres: usize,
    pub distinct_makers: usize,
    pub first_purchase: Option<NaiveDate>,
    pub last_purchase: Option<NaiveDate>,
    pub errors: usize,
    pub cancelled: bool,
}

pub fn summary(result: &RunResult, cfg: &ReportConfig) -> Summary {
    let days = result.records.iter().map(|r| r.purchased_at.date());
    Summary {
        total_items: result.total_items,
        total_price: result.total_price,
        converted_total: convert(result.total_price, cfg.exchange_rate),
        converted_currency: cfg.converted_currency.clone(),
        exchange_rate: cfg.exchange_rate,
        delisted: result.delisted.len(),
        distinct_genres: result.genre_counts.len(),
        distinct_makers: result.maker_counts.len(),
        first_purchase: days.clone().min(),
        last_purchase: days.max(),
        errors: result.errors.len(),
        cancelled: result.cancelled,
    }
}

/// Source amount in the converted currency, rounded to cents.
pub fn convert(amount: i64, exchange_rate: f64) -> f64 {
    if exchange_rate <= 0.0 {
        return 0.0;
    }
    (amount as f64 / exchange_rate * 100.0).round() / 100.0
}

// ── Report bundle ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelistedEntry {
    pub day: NaiveDate,
    pub title: String,
    pub maker: String,
    pub price: i64,
}

/// Everything a renderer may show.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub summary: Summary,
    pub min_count: u64,
    pub genres: Vec<RankedEntry>,
    pub makers: Vec<RankedEntry>,
    pub delisted: Vec<DelistedEntry>,
    pub timeline: Vec<TimelineDay>,
    pub cumulative_spend: Vec<(NaiveDate, i64)>,
    pub errors: Vec<String>,
}

impl Report {
    pub fn build(result: &RunResult, cfg: &ReportConfig) -> Self {
        Self {
            summary: summary(result, cfg),
            min_count: cfg.min_count,
            genres: ranked_genres(result, cfg.min_count),
            makers: ranked_makers(result, cfg.min_count),
            delisted: result
                .delisted
                .iter()
                .map(|r| DelistedEntry {
                    day: r.purchased_at.date(),
                    title: r.title.clone(),
                    maker: r.maker_name.clone(),
                    price: r.price,
                })
                .collect(),
            timeline: timeline(result),
            cumulative_spend: cumulative_spend(result),
            errors: result.errors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(day: u32, hour: u32, title: &str, genre: &str, price: i64) -> PurchaseRecord {
        PurchaseRecord {
            source_url: format!("https://shop.example/{title}"),
            purchased_at: NaiveDate::from_ymd_opt(2023, 6, day).unwrap().and_hms_opt(hour, 0, 0).unwrap(),
            title: title.to_string(),
            genre: genre.to_string(),
            genre_link: None,
            detail_genres: Vec::new(),
            price,
            maker_name: format!("maker-{genre}"),
            maker_link: None,
        }
    }

    fn sample() -> RunResult {
        let mut r = RunResult::default();
        // merged out of date order on purpose
        for rec in [
            record(3, 20, "e", "ACT", 700),
            record(1, 9, "a", "RPG", 500),
            record(2, 10, "b", "ADV", 0),
            record(1, 23, "c", "ACT", 300),
            record(2, 1, "d", "RPG", 1000),
            record(3, 5, "f", "SLG", 200),
        ] {
            r.merge(rec);
        }
        r
    }

    fn keys(entries: &[RankedEntry]) -> Vec<(&str, u64)> {
        entries.iter().map(|e| (e.key.as_str(), e.count)).collect()
    }

    #[test]
    fn rankings_are_descending_and_stable() {
        let r = sample();
        assert_eq!(
            keys(&ranked_genres(&r, 0)),
            [("ACT", 2), ("RPG", 2), ("ADV", 1), ("SLG", 1)]
        );
        assert_eq!(ranked_makers(&r, 0).len(), r.maker_counts.len());
    }

    #[test]
    fn min_count_filters_a_subset() {
        let r = sample();
        let all = ranked_genres(&r, 0);
        for n in 0..=3 {
            let expected: Vec<RankedEntry> = all.iter().filter(|e| e.count >= n).cloned().collect();
            assert_eq!(ranked_genres(&r, n), expected);
        }
        assert!(ranked_genres(&r, 3).is_empty());
    }

    #[test]
    fn timeline_groups_by_day_in_order() {
        let t = timeline(&sample());
        let days: Vec<u32> = t.iter().map(|d| chrono::Datelike::day(&d.day)).collect();
        assert_eq!(days, [1, 2, 3]);
        let first: Vec<&str> = t[0].purchases.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(first, ["a", "c"]);
        let last: Vec<&str> = t[2].purchases.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(last, ["e", "f"]);
    }

    #[test]
    fn cumulative_spend_is_prefix_summed() {
        let spend: Vec<i64> = cumulative_spend(&sample()).into_iter().map(|(_, v)| v).collect();
        assert_eq!(spend, [800, 1800, 2700]);
        assert_eq!(*spend.last().unwrap(), sample().total_price);
    }

    #[test]
    fn summary_converts_currency() {
        let cfg = ReportConfig {
            exchange_rate: 150.0,
            ..ReportConfig::default()
        };
        let s = summary(&sample(), &cfg);
        assert_eq!(s.total_items, 6);
        assert_eq!(s.total_price, 2700);
        assert_eq!(s.converted_total, 18.0);
        assert_eq!(s.first_purchase, NaiveDate::from_ymd_opt(2023, 6, 1));
        assert_eq!(s.last_purchase, NaiveDate::from_ymd_opt(2023, 6, 3));
        assert_eq!(s.distinct_genres, 4);
    }

    #[test]
    fn empty_run_projects_cleanly() {
        let report = Report::build(&RunResult::default(), &ReportConfig::default());
        assert!(report.genres.is_empty());
        assert!(report.timeline.is_empty());
        assert!(report.cumulative_spend.is_empty());
        assert_eq!(report.summary.first_purchase, None);
        assert_eq!(report.summary.converted_total, 0.0);
    }
}
