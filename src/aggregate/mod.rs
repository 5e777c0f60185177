//! Folding records into the run accumulator.
//!
//! `RunResult` is owned by the orchestrator task and every merge runs to
//! completion before the next page outcome is looked at, so no lock is needed.

use crate::models::{PurchaseRecord, RunResult};

/// What one page task hands back once it has settled.
#[derive(Debug, Default)]
pub struct PageOutcome {
    pub page: u32,
    pub records: Vec<PurchaseRecord>,
    pub errors: Vec<String>,
    pub failed: bool,
    /// Settled by cancellation rather than by finishing.
    pub cancelled: bool,
}

impl RunResult {
    /// Fold one record into every aggregate.
    pub fn merge(&mut self, record: PurchaseRecord) {
        self.total_items += 1;
        if record.price > 0 {
            self.total_price += record.price;
        }

        self.genre_counts.bump(&record.genre, record.genre_link.as_deref());
        for genre in &record.detail_genres {
            self.genre_counts.bump(genre, None);
        }
        self.maker_counts.bump(&record.maker_name, record.maker_link.as_deref());

        if record.is_delisted() {
            self.delisted.push(record.clone());
        }
        self.records.push(record);
    }

    /// Merge a settled page: its records first, then its diagnostics.
    pub fn absorb(&mut self, outcome: PageOutcome) -> usize {
        let n = outcome.records.len();
        for record in outcome.records {
            self.merge(record);
        }
        self.errors.extend(outcome.errors);
        n
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}
