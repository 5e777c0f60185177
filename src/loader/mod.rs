//! Reads a JSON export back so reports can be rebuilt without scraping.

use crate::export::ExportDocument;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn load_export(path: &Path) -> Result<ExportDocument> {
    debug!("Loading export from {:?}", path);
    let file = File::open(path).with_context(|| format!("Could not open {:?}", path))?;
    let doc: ExportDocument = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("{:?} is not a purchase-report JSON export", path))?;

    info!(
        "{:?}: {} records exported at {}",
        path,
        doc.result.records.len(),
        doc.generated_at
    );
    Ok(doc)
}

/// Accept either the export file itself or the directory it was written to.
pub fn resolve_export_path(input: &Path) -> Result<PathBuf> {
    if input.is_dir() {
        let candidate = input.join("purchase-report.json");
        anyhow::ensure!(candidate.is_file(), "No purchase-report.json in {:?}", input);
        Ok(candidate)
    } else {
        Ok(input.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportConfig;
    use crate::export::{export_all, ExportFormat};
    use crate::models::{PurchaseRecord, RunResult};
    use crate::report::{ranked_genres, ranked_makers, timeline, Report};
    use chrono::NaiveDate;

    fn sample() -> RunResult {
        let mut r = RunResult::default();
        let rows = [
            (5, 22, "Night Bus", "Voice", 880, "Studio A", "https://shop.example/w/1"),
            (3, 8, "Old Map", "RPG", 1320, "Studio B", ""),
            (5, 1, "Free Demo", "RPG", 0, "Studio A", "https://shop.example/w/3"),
            (4, 13, "Tides", "ADV", 2200, "Studio C", "https://shop.example/w/4"),
        ];
        for (day, hour, title, genre, price, maker, url) in rows {
            let mut rec = PurchaseRecord {
                source_url: url.to_string(),
                purchased_at: NaiveDate::from_ymd_opt(2024, 2, day).unwrap().and_hms_opt(hour, 0, 0).unwrap(),
                title: title.to_string(),
                genre: genre.to_string(),
                genre_link: Some(format!("https://shop.example/g/{genre}")),
                detail_genres: Vec::new(),
                price,
                maker_name: maker.to_string(),
                maker_link: Some(format!("https://shop.example/m/{maker}")),
            };
            if title == "Tides" {
                rec.detail_genres = vec!["Romance".into(), "RPG".into()];
            }
            r.merge(rec);
        }
        r.log_error("page 4: timed out after 120s");
        r
    }

    #[test]
    fn json_export_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let result = sample();
        let cfg = ReportConfig {
            min_count: 1,
            ..ReportConfig::default()
        };
        let report = Report::build(&result, &cfg);
        export_all(&result, &report, &cfg, dir.path(), &[ExportFormat::Json]).unwrap();

        let doc = load_export(&resolve_export_path(dir.path()).unwrap()).unwrap();

        assert_eq!(doc.result, result);
        assert_eq!(doc.result.total_items, result.total_items);
        assert_eq!(doc.result.total_price, result.total_price);
        assert_eq!(ranked_genres(&doc.result, 0), ranked_genres(&result, 0));
        assert_eq!(ranked_makers(&doc.result, 2), ranked_makers(&result, 2));
        assert_eq!(timeline(&doc.result), timeline(&result));
        assert_eq!(Report::build(&doc.result, &cfg), report);
        assert_eq!(doc.report.genres, report.genres);
        assert_eq!(doc.min_count, 1);
    }

    #[test]
    fn rejects_foreign_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.json");
        std::fs::write(&path, r#"{"hello": "world"}"#).unwrap();
        let err = load_export(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("not a purchase-report JSON export"));
    }

    #[test]
    fn directory_without_export_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_export_path(dir.path()).is_err());
    }
}
