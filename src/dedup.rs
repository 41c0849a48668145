// 🔍 Deduplicator - collapse repeated transactions across files
// Run-scoped: the index lives for one consolidation and is never persisted.
// First seen wins, where "first" means deterministic file-name order, not
// arrival order.

use crate::model::{Statement, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Set of dedup keys seen so far in this run.
#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: HashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        DedupIndex::default()
    }

    /// Record a key; true when it was not seen before.
    pub fn insert(&mut self, key: &str) -> bool {
        self.seen.insert(key.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Counts for the consolidation summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupReport {
    pub total_parsed: usize,
    pub kept: usize,
    pub removed: usize,
}

/// Collapse duplicates across statements and return the consolidated
/// sequence, stably sorted by date so first-seen order survives within a
/// date. Statements must already be in deterministic (file-name) order.
pub fn consolidate(statements: &[Statement]) -> (Vec<Transaction>, DedupReport) {
    let mut index = DedupIndex::new();
    let mut kept: Vec<Transaction> = Vec::new();
    let mut total_parsed = 0;

    for statement in statements {
        for tx in statement.transactions() {
            total_parsed += 1;
            if index.insert(&tx.dedup_key()) {
                kept.push(tx.clone());
            }
        }
    }

    kept.sort_by_key(|tx| tx.date);

    let report = DedupReport {
        total_parsed,
        kept: kept.len(),
        removed: total_parsed - kept.len(),
    };
    (kept, report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Competency;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn statement_with(file: &str, txs: Vec<Transaction>) -> Statement {
        let mut st = Statement::new(file);
        for tx in txs {
            st.push(tx, None);
        }
        st
    }

    fn tx(file: &str, day: u32, signed: f64, description: &str) -> Transaction {
        Transaction::from_signed(
            date(2025, 1, day),
            description.to_string(),
            None,
            signed,
            Competency::new(2025, 1).unwrap(),
            file.to_string(),
        )
    }

    #[test]
    fn test_duplicate_content_collapses_to_first_seen() {
        let a = statement_with("a.txt", vec![tx("a.txt", 5, -100.0, "PAGAMENTO BOLETO")]);
        let b = statement_with("b.txt", vec![tx("b.txt", 5, -100.0, "PAGAMENTO BOLETO")]);

        let (kept, report) = consolidate(&[a, b]);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source_file, "a.txt", "first-seen file wins");
        assert_eq!(report.total_parsed, 2);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn test_removed_equals_total_minus_distinct() {
        let a = statement_with(
            "a.txt",
            vec![
                tx("a.txt", 5, -100.0, "PAGAMENTO"),
                tx("a.txt", 6, 50.0, "PIX"),
                tx("a.txt", 6, 50.0, "PIX"),
            ],
        );
        let b = statement_with("b.txt", vec![tx("b.txt", 5, -100.0, "PAGAMENTO")]);

        let (kept, report) = consolidate(&[a, b]);

        assert_eq!(kept.len(), 2);
        assert_eq!(report.removed, report.total_parsed - kept.len());
        assert_eq!(report.removed, 2);
    }

    #[test]
    fn test_external_id_preferred_over_content() {
        // Same content, different sourced ids: both kept
        let mut t1 = tx("a.ofx", 5, -100.0, "PAGAMENTO");
        t1.external_id = Some("FIT001".to_string());
        let mut t2 = tx("a.ofx", 5, -100.0, "PAGAMENTO");
        t2.external_id = Some("FIT002".to_string());

        let (kept, _) = consolidate(&[statement_with("a.ofx", vec![t1, t2])]);
        assert_eq!(kept.len(), 2);

        // Same sourced id, different content: collapsed
        let mut t3 = tx("b.ofx", 5, -100.0, "PAGAMENTO");
        t3.external_id = Some("FIT001".to_string());
        let mut t4 = tx("b.ofx", 6, -999.0, "OUTRO");
        t4.external_id = Some("FIT001".to_string());

        let (kept, report) = consolidate(&[statement_with("b.ofx", vec![t3, t4])]);
        assert_eq!(kept.len(), 1);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn test_output_sorted_by_date_stable() {
        let a = statement_with(
            "a.txt",
            vec![
                tx("a.txt", 7, -10.0, "SEGUNDO DIA"),
                tx("a.txt", 5, -20.0, "PRIMEIRO A"),
            ],
        );
        let b = statement_with("b.txt", vec![tx("b.txt", 5, -30.0, "PRIMEIRO B")]);

        let (kept, _) = consolidate(&[a, b]);

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].description, "PRIMEIRO A");
        assert_eq!(kept[1].description, "PRIMEIRO B");
        assert_eq!(kept[2].description, "SEGUNDO DIA");
    }

    #[test]
    fn test_index_is_run_scoped() {
        let mut index = DedupIndex::new();
        assert!(index.insert("k1"));
        assert!(!index.insert("k1"));
        assert_eq!(index.len(), 1);
    }
}
