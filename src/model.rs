// Canonical record model shared by every parser and the exporter.
// Parsers produce Statements; dedup/reconciliation consume them and emit
// the consolidated Transaction sequence.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================================================
// COMPETENCY
// ============================================================================

/// Year-month period tag attached to every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Competency {
    pub year: i32,
    pub month: u32,
}

/// Full Portuguese month names as they appear in statement period headers.
/// MARCO appears both with and without the cedilla in extracted text.
const MONTH_NAMES: &[(&str, u32)] = &[
    ("JANEIRO", 1),
    ("FEVEREIRO", 2),
    ("MARCO", 3),
    ("MARÇO", 3),
    ("ABRIL", 4),
    ("MAIO", 5),
    ("JUNHO", 6),
    ("JULHO", 7),
    ("AGOSTO", 8),
    ("SETEMBRO", 9),
    ("OUTUBRO", 10),
    ("NOVEMBRO", 11),
    ("DEZEMBRO", 12),
];

const MONTH_ABBREVS: &[(&str, u32)] = &[
    ("JAN", 1),
    ("FEV", 2),
    ("MAR", 3),
    ("ABR", 4),
    ("MAI", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AGO", 8),
    ("SET", 9),
    ("OUT", 10),
    ("NOV", 11),
    ("DEZ", 12),
];

impl Competency {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Competency { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Competency {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Resolve a full Portuguese month name ("JANEIRO", "MARÇO", ...).
    pub fn from_month_name(name: &str, year: i32) -> Option<Self> {
        let upper = name.trim().to_uppercase();
        MONTH_NAMES
            .iter()
            .find(|(n, _)| *n == upper)
            .and_then(|(_, m)| Competency::new(year, *m))
    }

    /// Resolve a three-letter Portuguese abbreviation ("JAN".."DEZ").
    pub fn from_month_abbrev(abbrev: &str, year: i32) -> Option<Self> {
        let upper = abbrev.trim().to_uppercase();
        MONTH_ABBREVS
            .iter()
            .find(|(n, _)| *n == upper)
            .and_then(|(_, m)| Competency::new(year, *m))
    }
}

impl fmt::Display for Competency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{}", self.month, self.year)
    }
}

// ============================================================================
// RAW LINE
// ============================================================================

/// A text line with source lineage. Transient: consumed by the line parsers
/// and discarded once a Statement is built.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub page: usize,
    pub number: usize,
    pub text: String,
}

impl RawLine {
    /// Wrap whole-file text as a single page of numbered lines.
    pub fn from_text(text: &str) -> Vec<RawLine> {
        text.lines()
            .enumerate()
            .map(|(i, l)| RawLine {
                page: 1,
                number: i + 1,
                text: l.to_string(),
            })
            .collect()
    }

    /// Wrap per-page extracted text (one string per page), numbering lines
    /// continuously across pages.
    pub fn from_pages(pages: &[String]) -> Vec<RawLine> {
        let mut out = Vec::new();
        let mut number = 0;
        for (p, text) in pages.iter().enumerate() {
            for line in text.lines() {
                number += 1;
                out.push(RawLine {
                    page: p + 1,
                    number,
                    text: line.to_string(),
                });
            }
        }
        out
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// Canonical ledger transaction. Exactly one of debit/credit is nonzero;
/// both are always >= 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub description: String,
    pub document: Option<String>,
    pub debit: f64,
    pub credit: f64,
    pub competency: Competency,
    pub source_file: String,

    /// Institution-issued unique id (OFX FITID) when the source carried one.
    /// Surrogate ids generated during repair are NOT stored here — they are
    /// not stable across runs and must not drive deduplication.
    pub external_id: Option<String>,

    /// Set when the normalizer substituted the current date for a corrupt
    /// one. Exposed so reordering caused by the substitution stays visible.
    pub date_corrected: bool,
}

impl Transaction {
    /// Build from a signed amount: negative becomes debit, positive credit.
    /// A zero amount cannot satisfy the one-nonzero-side invariant and is
    /// rejected by the caller before this point.
    pub fn from_signed(
        date: NaiveDate,
        description: String,
        document: Option<String>,
        signed_amount: f64,
        competency: Competency,
        source_file: String,
    ) -> Self {
        let (debit, credit) = if signed_amount < 0.0 {
            (-signed_amount, 0.0)
        } else {
            (0.0, signed_amount)
        };
        Transaction {
            date,
            description,
            document,
            debit,
            credit,
            competency,
            source_file,
            external_id: None,
            date_corrected: false,
        }
    }

    /// Credit minus debit.
    pub fn signed_amount(&self) -> f64 {
        self.credit - self.debit
    }

    /// Description with whitespace collapsed, for hashing and comparison.
    pub fn normalized_description(&self) -> String {
        self.description
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase()
    }

    /// Dedup key: the sourced external id when present, else a content hash
    /// of (date, normalized description, signed amount).
    pub fn dedup_key(&self) -> String {
        if let Some(id) = &self.external_id {
            return id.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{:.2}",
            self.date,
            self.normalized_description(),
            self.signed_amount()
        ));
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// STATEMENT
// ============================================================================

/// One parsed transaction plus the running balance the statement declared on
/// its line, when the format carries one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementEntry {
    pub transaction: Transaction,
    pub declared_balance: Option<f64>,
}

/// A line the parser could not turn into a transaction. Diagnostic only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedLine {
    pub page: usize,
    pub number: usize,
    pub content: String,
    pub reason: String,
}

/// Ordered transactions for one source file, with reconciliation inputs and
/// the per-file skip log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub source_file: String,
    pub opening_balance: Option<f64>,
    pub entries: Vec<StatementEntry>,
    pub skipped: Vec<SkippedLine>,
}

impl Statement {
    pub fn new(source_file: &str) -> Self {
        Statement {
            source_file: source_file.to_string(),
            opening_balance: None,
            entries: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn push(&mut self, transaction: Transaction, declared_balance: Option<f64>) {
        self.entries.push(StatementEntry {
            transaction,
            declared_balance,
        });
    }

    pub fn skip(&mut self, line: &RawLine, reason: &str) {
        self.skipped.push(SkippedLine {
            page: line.page,
            number: line.number,
            content: line.text.clone(),
            reason: reason.to_string(),
        });
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.entries.iter().map(|e| &e.transaction)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
