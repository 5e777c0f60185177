use crate::config::SelectorConfig;
use crate::models::RawPurchaseRow;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid {field} selector {selector:?}: {reason}")]
pub struct SelectorError {
    pub field: &'static str,
    pub selector: String,
    pub reason: String,
}

fn compile(field: &'static str, selector: &str) -> Result<Selector, SelectorError> {
    Selector::parse(selector).map_err(|e| SelectorError {
        field,
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

// ── Compiled selectors ────────────────────────────────────────────────────────

/// Selectors compiled once per run and shared by every page task.
#[derive(Debug)]
pub struct Selectors {
    row: Selector,
    cell: Selector,
    header_cell: Selector,
    title: Selector,
    title_link: Selector,
    date: Selector,
    genre: Selector,
    genre_link: Selector,
    price: Selector,
    maker: Selector,
    maker_link: Selector,
    page_count: Selector,
    page_count_attr: String,
    detail_genre: Selector,
}

impl Selectors {
    pub fn compile(cfg: &SelectorConfig) -> Result<Self, SelectorError> {
        Ok(Self {
            row: compile("row", &cfg.row)?,
            cell: compile("cell", "td")?,
            header_cell: compile("header cell", "th")?,
            title: compile("title", &cfg.title)?,
            title_link: compile("title_link", &cfg.title_link)?,
            date: compile("date", &cfg.date)?,
            genre: compile("genre", &cfg.genre)?,
            genre_link: compile("genre_link", &cfg.genre_link)?,
            price: compile("price", &cfg.price)?,
            maker: compile("maker", &cfg.maker)?,
            maker_link: compile("maker_link", &cfg.maker_link)?,
            page_count: compile("page_count", &cfg.page_count)?,
            page_count_attr: cfg.page_count_attr.clone(),
            detail_genre: compile("detail_genre", &cfg.detail_genre)?,
        })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Whitespace-collapsed text of the first match, `None` when absent or blank.
fn first_text(el: &ElementRef, sel: &Selector) -> Option<String> {
    let node = el.select(sel).next()?;
    let text = node.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() { None } else { Some(text) }
}

fn first_href(el: &ElementRef, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

// ── Listing page ──────────────────────────────────────────────────────────────

/// Pull every purchase row out of a history page. Header rows are skipped,
/// missing fields are left as `None` for the cleaner to judge.
pub fn parse_purchase_rows(html: &str, sel: &Selectors) -> Vec<RawPurchaseRow> {
    let doc = Html::parse_document(html);
    let mut rows = Vec::new();

    for tr in doc.select(&sel.row) {
        if tr.select(&sel.header_cell).next().is_some() || tr.select(&sel.cell).next().is_none() {
            continue;
        }

        rows.push(RawPurchaseRow {
            url: first_href(&tr, &sel.title_link),
            date: first_text(&tr, &sel.date),
            title: first_text(&tr, &sel.title),
            genre: first_text(&tr, &sel.genre),
            genre_link: first_href(&tr, &sel.genre_link),
            price: first_text(&tr, &sel.price),
            maker: first_text(&tr, &sel.maker),
            maker_link: first_href(&tr, &sel.maker_link),
        });
    }

    rows
}

/// Total page count from the last entry of the pagination control.
pub fn parse_page_count(html: &str, sel: &Selectors) -> Option<u32> {
    let doc = Html::parse_document(html);
    let last = doc.select(&sel.page_count).last()?;
    let raw = last
        .value()
        .attr(&sel.page_count_attr)
        .map(str::to_string)
        .unwrap_or_else(|| last.text().collect::<String>());
    raw.trim().parse::<u32>().ok().filter(|n| *n >= 1)
}

// ── Detail page ───────────────────────────────────────────────────────────────

/// Every "main genre" tag listed on a work's own page, in page order.
pub fn parse_detail_genres(html: &str, sel: &Selectors) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&sel.detail_genre)
        .map(|a| a.text().collect::<String>().trim().to_string())
        .filter(|g| !g.is_empty())
        .collect()
}
