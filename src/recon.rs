// ⚖️ Reconciler - declared vs. computed running balances
// A nonzero difference signals a parsing gap or an upstream data defect.
// It is reported, never auto-corrected.

use crate::model::Statement;
use serde::{Deserialize, Serialize};

/// One compared entry: the balance computed from amounts against the balance
/// the statement declared on that line. `difference` is declared - computed,
/// so a positive value means the statement claims more money than the
/// amounts account for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub entry_index: usize,
    pub computed: f64,
    pub declared: f64,
    pub difference: f64,
}

/// Per-statement reconciliation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub source_file: String,
    pub opening_balance: f64,
    pub results: Vec<ReconciliationResult>,
}

impl ReconciliationReport {
    pub fn mismatches(&self, tolerance: f64) -> Vec<&ReconciliationResult> {
        self.results
            .iter()
            .filter(|r| r.difference.abs() > tolerance)
            .collect()
    }

    pub fn is_balanced(&self, tolerance: f64) -> bool {
        self.mismatches(tolerance).is_empty()
    }

    pub fn summary(&self, tolerance: f64) -> String {
        format!(
            "Reconciliation for {}: {} declared balances checked, {} mismatched",
            self.source_file,
            self.results.len(),
            self.mismatches(tolerance).len()
        )
    }
}

/// Walks a statement accumulating signed amounts from the declared opening
/// balance and compares against every declared running balance.
pub struct ReconciliationEngine {
    /// Tolerance for floating-point comparison of balances.
    pub tolerance: f64,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine { tolerance: 0.005 }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        ReconciliationEngine { tolerance }
    }

    /// Compare computed and declared balances for every entry that carries a
    /// declared value. Statements with no declared opening balance reconcile
    /// from zero.
    pub fn reconcile(&self, statement: &Statement) -> ReconciliationReport {
        let opening = statement.opening_balance.unwrap_or(0.0);
        let mut running = opening;
        let mut results = Vec::new();

        for (index, entry) in statement.entries.iter().enumerate() {
            running += entry.transaction.signed_amount();
            if let Some(declared) = entry.declared_balance {
                results.push(ReconciliationResult {
                    entry_index: index,
                    computed: running,
                    declared,
                    difference: declared - running,
                });
            }
        }

        ReconciliationReport {
            source_file: statement.source_file.clone(),
            opening_balance: opening,
            results,
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Competency, Transaction};
    use chrono::NaiveDate;

    fn entry(signed: f64) -> Transaction {
        Transaction::from_signed(
            NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            "LANCAMENTO".to_string(),
            None,
            signed,
            Competency::new(2025, 1).unwrap(),
            "sicredi.txt".to_string(),
        )
    }

    fn statement(opening: Option<f64>, rows: Vec<(f64, Option<f64>)>) -> Statement {
        let mut st = Statement::new("sicredi.txt");
        st.opening_balance = opening;
        for (signed, declared) in rows {
            st.push(entry(signed), declared);
        }
        st
    }

    #[test]
    fn test_balanced_chain() {
        // B0 = 1000; +250 -> 1250; -117.40 -> 1132.60
        let st = statement(
            Some(1000.0),
            vec![(250.0, Some(1250.0)), (-117.40, Some(1132.60))],
        );
        let report = ReconciliationEngine::new().reconcile(&st);

        assert_eq!(report.results.len(), 2);
        assert!(report.is_balanced(0.005));
        assert!((report.results[1].computed - 1132.60).abs() < 1e-9);
    }

    #[test]
    fn test_mismatch_reports_exact_signed_difference() {
        // Declared jumps by 10 more than the amounts justify
        let st = statement(
            Some(500.0),
            vec![(100.0, Some(600.0)), (-50.0, Some(560.0))],
        );
        let engine = ReconciliationEngine::new();
        let report = engine.reconcile(&st);

        let mismatches = report.mismatches(engine.tolerance);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].entry_index, 1);
        assert!((mismatches[0].difference - 10.0).abs() < 1e-9);
        // Never auto-corrected: computed keeps following the amounts
        assert!((mismatches[0].computed - 550.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_opening_balance_defaults_to_zero() {
        let st = statement(None, vec![(100.0, Some(100.0))]);
        let report = ReconciliationEngine::new().reconcile(&st);
        assert_eq!(report.opening_balance, 0.0);
        assert!(report.is_balanced(0.005));
    }

    #[test]
    fn test_entries_without_declared_balance_are_skipped() {
        let st = statement(Some(0.0), vec![(100.0, None), (-40.0, Some(60.0))]);
        let report = ReconciliationEngine::new().reconcile(&st);
        // Only one comparison, but the running sum still saw both amounts
        assert_eq!(report.results.len(), 1);
        assert!(report.is_balanced(0.005));
    }
}
