use crate::models::{PurchaseRecord, RawPurchaseRow};
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use url::Url;

/// A row that cannot become a record.
#[derive(Debug, Error, PartialEq)]
pub enum ExtractError {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("unrecognised purchase date {0:?}")]
    InvalidDate(String),
}

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Price in source-currency units. Anything after the first `/` is a
/// conversion suffix and ignored; unparseable text is a free item.
/// "1,100円 / 7.33 USD" → 1100 | "¥500 / tax" → 500 | "" → 0
pub fn parse_price(s: &str) -> i64 {
    let head = s.split('/').next().unwrap_or("");
    let digits: String = head.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%Y-%m-%d", "%Y年%m月%d日"];

/// Parse purchase timestamps as the history page prints them.
/// Date-only text lands on midnight.
pub fn parse_purchase_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    // "2023年04月01日 12:30" and similar: keep the date, drop the clock
    let (date_part, _) = s.split_once(' ')?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Resolve a possibly relative href against the page it came from.
pub fn resolve_link(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

// ── RawPurchaseRow → PurchaseRecord ───────────────────────────────────────────

pub fn raw_row_to_record(raw: &RawPurchaseRow, base: &Url) -> Result<PurchaseRecord, ExtractError> {
    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ExtractError::MissingField("title"))?;

    let date_text = raw
        .date
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or(ExtractError::MissingField("purchase date"))?;
    let purchased_at =
        parse_purchase_date(date_text).ok_or_else(|| ExtractError::InvalidDate(date_text.to_string()))?;

    let link = |href: &Option<String>| href.as_deref().map(|h| resolve_link(base, h));

    Ok(PurchaseRecord {
        source_url: link(&raw.url).unwrap_or_default(),
        purchased_at,
        title: title.to_string(),
        genre: raw.genre.clone().unwrap_or_default(),
        genre_link: link(&raw.genre_link),
        detail_genres: Vec::new(),
        price: raw.price.as_deref().map(parse_price).unwrap_or(0),
        maker_name: raw.maker.clone().unwrap_or_default(),
        maker_link: link(&raw.maker_link),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://shop.example/mypage/userbuy/page/1").unwrap()
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("¥500 / tax"), 500);
        assert_eq!(parse_price("1,100円 / 7.33 USD"), 1100);
        assert_eq!(parse_price("¥0 / tax"), 0);
        assert_eq!(parse_price("free"), 0);
        assert_eq!(parse_price(""), 0);
        assert_eq!(parse_price("/ 12 USD"), 0);
    }

    #[test]
    fn test_parse_purchase_date() {
        let d = |y, m, day, h, min| {
            NaiveDate::from_ymd_opt(y, m, day)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap()
        };
        assert_eq!(parse_purchase_date("2023/04/01 12:30"), Some(d(2023, 4, 1, 12, 30)));
        assert_eq!(parse_purchase_date(" 2023/04/01\n  12:30 "), Some(d(2023, 4, 1, 12, 30)));
        assert_eq!(parse_purchase_date("2023-04-01T12:30:00"), Some(d(2023, 4, 1, 12, 30)));
        assert_eq!(parse_purchase_date("2023/04/01"), Some(d(2023, 4, 1, 0, 0)));
        assert_eq!(parse_purchase_date("2023年04月01日"), Some(d(2023, 4, 1, 0, 0)));
        assert_eq!(parse_purchase_date("2023年04月01日 12:30"), Some(d(2023, 4, 1, 0, 0)));
        assert_eq!(parse_purchase_date("yesterday"), None);
        assert_eq!(parse_purchase_date(""), None);
    }

    #[test]
    fn record_resolves_relative_links() {
        let raw = RawPurchaseRow {
            url: Some("/work/RJ01.html".into()),
            date: Some("2023/04/01 12:30".into()),
            title: Some("Starfall".into()),
            genre: Some("RPG".into()),
            genre_link: Some("https://other.example/rpg".into()),
            price: Some("¥500 / tax".into()),
            maker: Some("M1".into()),
            maker_link: Some("circle/M1".into()),
        };
        let rec = raw_row_to_record(&raw, &base()).unwrap();
        assert_eq!(rec.source_url, "https://shop.example/work/RJ01.html");
        assert_eq!(rec.genre_link.as_deref(), Some("https://other.example/rpg"));
        assert_eq!(rec.maker_link.as_deref(), Some("https://shop.example/mypage/userbuy/page/circle/M1"));
        assert_eq!(rec.price, 500);
        assert!(!rec.is_delisted());
    }

    #[test]
    fn optional_fields_degrade() {
        let raw = RawPurchaseRow {
            date: Some("2023/04/01".into()),
            title: Some("Bare".into()),
            ..Default::default()
        };
        let rec = raw_row_to_record(&raw, &base()).unwrap();
        assert!(rec.is_delisted());
        assert_eq!(rec.genre, "");
        assert_eq!(rec.maker_name, "");
        assert_eq!(rec.price, 0);
        assert_eq!(rec.genre_link, None);
    }

    #[test]
    fn mandatory_fields_are_enforced() {
        let no_title = RawPurchaseRow {
            date: Some("2023/04/01".into()),
            ..Default::default()
        };
        assert_eq!(
            raw_row_to_record(&no_title, &base()),
            Err(ExtractError::MissingField("title"))
        );

        let bad_date = RawPurchaseRow {
            date: Some("soon".into()),
            title: Some("T".into()),
            ..Default::default()
        };
        assert_eq!(
            raw_row_to_record(&bad_date, &base()),
            Err(ExtractError::InvalidDate("soon".into()))
        );
    }
}
