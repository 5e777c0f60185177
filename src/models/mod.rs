use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Purchase record ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchaseRecord {
    /// Detail page URL. Empty when the work has been delisted.
    pub source_url: String,
    pub purchased_at: NaiveDateTime,
    pub title: String,
    pub genre: String,
    pub genre_link: Option<String>,
    /// Only filled in detail mode.
    #[serde(default)]
    pub detail_genres: Vec<String>,
    pub price: i64,
    pub maker_name: String,
    pub maker_link: Option<String>,
}

impl PurchaseRecord {
    /// EOL: the work no longer has a reachable page.
    pub fn is_delisted(&self) -> bool {
        self.source_url.is_empty()
    }
}

// ── Aggregates ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateCount {
    pub count: u64,
    /// First non-empty link seen for the key.
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyedCount {
    pub key: String,
    pub count: u64,
    pub link: Option<String>,
}

/// Insertion-ordered key -> count table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<KeyedCount>", into = "Vec<KeyedCount>")]
pub struct CountTable {
    entries: Vec<(String, AggregateCount)>,
    index: HashMap<String, usize>,
}

impl CountTable {
    /// Count one occurrence of `key`. The link only sticks if none is set yet.
    pub fn bump(&mut self, key: &str, link: Option<&str>) {
        let link = link.filter(|l| !l.is_empty());
        match self.index.get(key) {
            Some(&i) => {
                let entry = &mut self.entries[i].1;
                entry.count += 1;
                if entry.link.is_none() {
                    entry.link = link.map(str::to_string);
                }
            }
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((
                    key.to_string(),
                    AggregateCount {
                        count: 1,
                        link: link.map(str::to_string),
                    },
                ));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&AggregateCount> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AggregateCount)> {
        self.entries.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, c)| c.count).sum()
    }
}

impl PartialEq for CountTable {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl From<Vec<KeyedCount>> for CountTable {
    fn from(rows: Vec<KeyedCount>) -> Self {
        let mut table = CountTable::default();
        for row in rows {
            match table.index.get(&row.key) {
                // duplicate keys in a hand-edited document: fold them
                Some(&i) => {
                    let entry = &mut table.entries[i].1;
                    entry.count += row.count;
                    if entry.link.is_none() {
                        entry.link = row.link;
                    }
                }
                None => {
                    table.index.insert(row.key.clone(), table.entries.len());
                    table.entries.push((
                        row.key,
                        AggregateCount {
                            count: row.count,
                            link: row.link,
                        },
                    ));
                }
            }
        }
        table
    }
}

impl From<CountTable> for Vec<KeyedCount> {
    fn from(table: CountTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|(key, c)| KeyedCount {
                key,
                count: c.count,
                link: c.link,
            })
            .collect()
    }
}

// ── Run accumulator ───────────────────────────────────────────────────────────

/// Everything one run produced. Mutated only through the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub total_items: u64,
    /// Sum of non-zero prices.
    pub total_price: i64,
    pub records: Vec<PurchaseRecord>,
    pub genre_counts: CountTable,
    pub maker_counts: CountTable,
    pub delisted: Vec<PurchaseRecord>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
}

// ── Raw rows ──────────────────────────────────────────────────────────────────

/// One purchase-history table row, as text pulled from the markup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPurchaseRow {
    pub url: Option<String>,
    pub date: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub genre_link: Option<String>,
    pub price: Option<String>,
    pub maker: Option<String>,
    pub maker_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_table_link_is_first_wins() {
        let mut t = CountTable::default();
        t.bump("RPG", None);
        t.bump("RPG", Some(""));
        t.bump("RPG", Some("https://a/rpg"));
        t.bump("RPG", Some("https://b/rpg"));
        let c = t.get("RPG").unwrap();
        assert_eq!(c.count, 4);
        assert_eq!(c.link.as_deref(), Some("https://a/rpg"));
    }

    #[test]
    fn count_table_keeps_insertion_order_through_serde() {
        let mut t = CountTable::default();
        t.bump("b", None);
        t.bump("a", Some("/a"));
        t.bump("b", None);

        let json = serde_json::to_string(&t).unwrap();
        let back: CountTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        let keys: Vec<&str> = back.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(back.get("b").unwrap().count, 2);
    }
}
