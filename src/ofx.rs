// 🔧 OFX/SGML Repair & Reconstruction Engine
// Recovers a transaction set from broken bank OFX markup through staged
// fallback strategies, then rebuilds a minimal document that must re-parse
// cleanly before any record is emitted.

use crate::error::{ConvertError, ConvertResult};
use crate::lines::decode_legacy;
use crate::model::{Competency, SkippedLine, Statement, Transaction};
use crate::normalize::{normalize_amount, normalize_date_with, normalize_decimal, to_ofx_date};
use chrono::{Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// ============================================================================
// SURROGATE ID GENERATION
// ============================================================================

/// Source of surrogate FITIDs for transactions the institution left
/// unidentified. Injectable so tests can supply deterministic ids.
pub trait IdGenerator {
    fn generate(&mut self) -> String;
}

/// Default generator: random uuid v4 hex. Ids are NOT stable across runs,
/// which is why surrogates never become dedup keys.
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn generate(&mut self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

// ============================================================================
// RAW ENTRIES & STRATEGIES
// ============================================================================

/// Which fallback located the transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairStrategy {
    /// Matched `<STMTTRN>...</STMTTRN>` pairs.
    StrictScan,
    /// Blocks split on opening tags, bounded by the next close or section end.
    LooseScan,
    /// Any line carrying both a date-shaped and a money-shaped token.
    HeuristicScan,
}

impl RepairStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            RepairStrategy::StrictScan => "strict scan",
            RepairStrategy::LooseScan => "loose scan",
            RepairStrategy::HeuristicScan => "heuristic scan",
        }
    }
}

/// Fields as pulled out of one transaction block, before normalization.
#[derive(Debug, Clone, Default)]
struct RawEntry {
    trntype: Option<String>,
    dtposted: Option<String>,
    trnamt: Option<String>,
    fitid: Option<String>,
    name: Option<String>,
    memo: Option<String>,
    checknum: Option<String>,
}

/// A fully normalized transaction ready for reconstruction.
#[derive(Debug, Clone)]
struct RepairedEntry {
    date: NaiveDate,
    date_corrected: bool,
    signed: f64,
    fitid: String,
    fitid_generated: bool,
    trntype: String,
    name: Option<String>,
    memo: Option<String>,
    checknum: Option<String>,
}

/// Successful repair: the reconstructed document (already through the
/// acceptance gate), the canonical statement, and the strategy diagnostics.
#[derive(Debug)]
pub struct RepairOutcome {
    pub strategy: RepairStrategy,
    pub document: String,
    pub statement: Statement,
    pub ledger_balance: Option<f64>,
    pub diagnostics: Vec<String>,
}

// ============================================================================
// PATTERNS
// ============================================================================

fn stmttrn_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<STMTTRN>(.*?)</STMTTRN>").expect("stmttrn regex"))
}

fn stmttrn_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<\s*STMTTRN\s*>").expect("stmttrn open regex"))
}

fn heuristic_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{8,14}").expect("heuristic date regex"))
}

fn heuristic_money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Grouped-thousands form first so "-1.200,00" is not truncated to "-1.20"
    RE.get_or_init(|| {
        Regex::new(r"-?\d{1,3}(\.\d{3})*,\d{2}|-?\d+[.,]\d{2}").expect("heuristic money regex")
    })
}

/// ASCII-case-insensitive substring search returning a byte offset into the
/// original text. Tag names are ASCII; values around them may not be, so the
/// haystack is never re-encoded.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Tolerant field extraction: prefers `<TAG>value</TAG>`, falls back to the
/// SGML form `<TAG>value` ending at the next '<', newline or end of block.
fn tag_value(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let start = find_ci(block, &open)? + open.len();
    let rest = &block[start..];

    if let Some(end) = find_ci(rest, &format!("</{}>", tag)) {
        let value = rest[..end].trim();
        return Some(value.to_string());
    }

    let end = rest
        .find(|c| c == '<' || c == '\n' || c == '\r')
        .unwrap_or(rest.len());
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn extract_fields(block: &str) -> RawEntry {
    RawEntry {
        trntype: tag_value(block, "TRNTYPE"),
        dtposted: tag_value(block, "DTPOSTED"),
        trnamt: tag_value(block, "TRNAMT"),
        fitid: tag_value(block, "FITID"),
        name: tag_value(block, "NAME"),
        memo: tag_value(block, "MEMO"),
        checknum: tag_value(block, "CHECKNUM"),
    }
}

// ============================================================================
// REPAIR ENGINE
// ============================================================================

pub struct OfxRepairEngine {
    ids: Box<dyn IdGenerator>,
    today: NaiveDate,
}

impl OfxRepairEngine {
    pub fn new() -> Self {
        OfxRepairEngine {
            ids: Box::new(UuidIds),
            today: Local::now().date_naive(),
        }
    }

    pub fn with_id_generator(ids: Box<dyn IdGenerator>) -> Self {
        OfxRepairEngine {
            ids,
            today: Local::now().date_naive(),
        }
    }

    /// Anchor the date sanity bound; used by tests.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Repair raw OFX/SGML bytes into a canonical statement plus a minimal
    /// well-formed document. Strategies run in order; the first one locating
    /// at least one transaction wins. The reconstructed document must pass
    /// the re-parse acceptance gate or the whole file fails with the
    /// artifact retained.
    pub fn repair(&mut self, bytes: &[u8], source_file: &str) -> ConvertResult<RepairOutcome> {
        let text = decode_legacy(bytes);

        // Drop the key:value header lines some exports carry before markup
        let body = match text.find('<') {
            Some(idx) => &text[idx..],
            None => text.as_str(),
        };

        let mut diagnostics = Vec::new();
        let mut chosen: Option<(RepairStrategy, Vec<RawEntry>)> = None;

        for strategy in [
            RepairStrategy::StrictScan,
            RepairStrategy::LooseScan,
            RepairStrategy::HeuristicScan,
        ] {
            let raw = match strategy {
                RepairStrategy::StrictScan => strict_scan(body),
                RepairStrategy::LooseScan => loose_scan(body),
                RepairStrategy::HeuristicScan => heuristic_scan(body),
            };
            diagnostics.push(format!("{}: {} blocks", strategy.name(), raw.len()));
            if !raw.is_empty() {
                chosen = Some((strategy, raw));
                break;
            }
        }

        let (strategy, raw_entries) = chosen.ok_or_else(|| ConvertError::FormatUnrecognized {
            file: source_file.to_string(),
        })?;

        let mut statement = Statement::new(source_file);
        let mut entries = Vec::new();

        for (index, raw) in raw_entries.iter().enumerate() {
            match self.normalize_entry(raw) {
                Ok(entry) => entries.push(entry),
                Err(reason) => statement.skipped.push(SkippedLine {
                    page: 1,
                    number: index + 1,
                    content: raw.trnamt.clone().or_else(|| raw.dtposted.clone()).unwrap_or_default(),
                    reason,
                }),
            }
        }

        if entries.is_empty() {
            return Err(ConvertError::FormatUnrecognized {
                file: source_file.to_string(),
            });
        }

        let ledger_balance = extract_ledger_balance(body);
        let account = extract_account(body);
        let document = reconstruct(&entries, &account, ledger_balance);

        // Acceptance gate: the document we just built must re-parse with the
        // same transaction count, or nothing is emitted for this file.
        match parse_reconstructed(&document) {
            Ok(count) if count == entries.len() => {}
            Ok(count) => {
                return Err(ConvertError::RepairRejected {
                    file: source_file.to_string(),
                    reason: format!(
                        "reconstructed document has {} transactions, expected {}",
                        count,
                        entries.len()
                    ),
                    artifact: document,
                });
            }
            Err(reason) => {
                return Err(ConvertError::RepairRejected {
                    file: source_file.to_string(),
                    reason,
                    artifact: document,
                });
            }
        }

        for entry in &entries {
            let description = entry
                .memo
                .clone()
                .or_else(|| entry.name.clone())
                .unwrap_or_default();
            let mut tx = Transaction::from_signed(
                entry.date,
                description,
                entry.checknum.clone(),
                entry.signed,
                Competency::from_date(entry.date),
                source_file.to_string(),
            );
            tx.date_corrected = entry.date_corrected;
            if !entry.fitid_generated {
                tx.external_id = Some(entry.fitid.clone());
            }
            statement.push(tx, None);
        }

        Ok(RepairOutcome {
            strategy,
            document,
            statement,
            ledger_balance,
            diagnostics,
        })
    }

    fn normalize_entry(&mut self, raw: &RawEntry) -> Result<RepairedEntry, String> {
        let amount_raw = raw
            .trnamt
            .as_deref()
            .ok_or_else(|| "missing amount".to_string())?;
        let signed = normalize_amount(amount_raw).map_err(|e| e.to_string())?;

        let date_raw = raw
            .dtposted
            .as_deref()
            .ok_or_else(|| "missing date".to_string())?;
        let nd = normalize_date_with(date_raw, self.today).map_err(|e| e.to_string())?;

        let (fitid, fitid_generated) = match raw.fitid.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => (id.to_string(), false),
            _ => (self.ids.generate(), true),
        };

        Ok(RepairedEntry {
            date: nd.date,
            date_corrected: nd.corrected,
            signed,
            fitid,
            fitid_generated,
            trntype: raw
                .trntype
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "OTHER".to_string()),
            name: raw.name.clone(),
            memo: raw.memo.clone(),
            checknum: raw.checknum.clone(),
        })
    }
}

impl Default for OfxRepairEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SCAN STRATEGIES
// ============================================================================

/// Extract `<STMTTRN>...</STMTTRN>` pairs, non-greedy, case-insensitive.
fn strict_scan(body: &str) -> Vec<RawEntry> {
    stmttrn_block_re()
        .captures_iter(body)
        .map(|c| extract_fields(&c[1]))
        .collect()
}

/// Split on opening tags; bound each block by the next `</STMTTRN>`, else
/// the next `</BANKTRANLIST>`, else the end of the text. Recovers documents
/// whose closing tags were dropped.
fn loose_scan(body: &str) -> Vec<RawEntry> {
    let parts: Vec<&str> = stmttrn_open_re().split(body).collect();
    if parts.len() <= 1 {
        return Vec::new();
    }

    parts[1..]
        .iter()
        .map(|part| {
            let end = find_ci(part, "</STMTTRN>")
                .or_else(|| find_ci(part, "</BANKTRANLIST>"))
                .unwrap_or(part.len());
            extract_fields(&part[..end])
        })
        .collect()
}

/// Last resort: a line holding both a date-shaped token (8-14 digits) and a
/// money-shaped token is an implicit transaction; the residue becomes the
/// description.
fn heuristic_scan(body: &str) -> Vec<RawEntry> {
    let mut entries = Vec::new();

    for line in body.lines() {
        let date_m = match heuristic_date_re().find(line) {
            Some(m) => m,
            None => continue,
        };
        let money_m = match heuristic_money_re().find(line) {
            Some(m) => m,
            None => continue,
        };

        let memo = heuristic_money_re()
            .replace_all(&heuristic_date_re().replace_all(line, ""), "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        entries.push(RawEntry {
            trntype: None,
            dtposted: Some(date_m.as_str().to_string()),
            trnamt: Some(money_m.as_str().to_string()),
            fitid: None,
            name: None,
            memo: if memo.is_empty() { None } else { Some(memo) },
            checknum: None,
        });
    }

    entries
}

// ============================================================================
// ACCOUNT & BALANCE CAPTURE
// ============================================================================

/// Account identifiers for the reconstructed header. Unknown fields get
/// placeholders so the document always carries a complete block.
#[derive(Debug, Clone)]
struct AccountBlock {
    bank_id: String,
    branch_id: String,
    account_id: String,
    account_type: String,
}

fn extract_account(body: &str) -> AccountBlock {
    let block = find_ci(body, "<BANKACCTFROM>")
        .map(|start| {
            let rest = &body[start..];
            let end = find_ci(rest, "</BANKACCTFROM>").unwrap_or(rest.len());
            &rest[..end]
        })
        .unwrap_or("");

    AccountBlock {
        bank_id: tag_value(block, "BANKID").unwrap_or_else(|| "UNKNOWN".to_string()),
        branch_id: tag_value(block, "BRANCHID").unwrap_or_else(|| "UNKNOWN".to_string()),
        account_id: tag_value(block, "ACCTID").unwrap_or_else(|| "UNKNOWN".to_string()),
        account_type: tag_value(block, "ACCTTYPE").unwrap_or_else(|| "CHECKING".to_string()),
    }
}

fn extract_ledger_balance(body: &str) -> Option<f64> {
    let start = find_ci(body, "<LEDGERBAL>")?;
    let rest = &body[start..];
    let end = find_ci(rest, "</LEDGERBAL>").unwrap_or(rest.len());
    let raw = tag_value(&rest[..end], "BALAMT")?;
    normalize_decimal(&raw).ok()
}

// ============================================================================
// RECONSTRUCTION
// ============================================================================

/// Emit the minimal well-formed document: account header, transaction list
/// bounded by the observed date range, and the ledger balance when one was
/// captured. One tag per line; every tag closed.
fn reconstruct(entries: &[RepairedEntry], account: &AccountBlock, ledger: Option<f64>) -> String {
    let dtstart = entries.iter().map(|e| e.date).min().expect("nonempty entries");
    let dtend = entries.iter().map(|e| e.date).max().expect("nonempty entries");

    let mut doc = String::new();
    doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    doc.push_str("<OFX>\n<BANKMSGSRSV1>\n<STMTTRNRS>\n<STMTRS>\n");

    doc.push_str("<BANKACCTFROM>\n");
    doc.push_str(&format!("<BANKID>{}</BANKID>\n", account.bank_id));
    doc.push_str(&format!("<BRANCHID>{}</BRANCHID>\n", account.branch_id));
    doc.push_str(&format!("<ACCTID>{}</ACCTID>\n", account.account_id));
    doc.push_str(&format!("<ACCTTYPE>{}</ACCTTYPE>\n", account.account_type));
    doc.push_str("</BANKACCTFROM>\n");

    doc.push_str("<BANKTRANLIST>\n");
    doc.push_str(&format!("<DTSTART>{}</DTSTART>\n", to_ofx_date(dtstart)));
    doc.push_str(&format!("<DTEND>{}</DTEND>\n", to_ofx_date(dtend)));

    for entry in entries {
        doc.push_str("<STMTTRN>\n");
        doc.push_str(&format!("<TRNTYPE>{}</TRNTYPE>\n", entry.trntype));
        doc.push_str(&format!("<DTPOSTED>{}</DTPOSTED>\n", to_ofx_date(entry.date)));
        doc.push_str(&format!("<TRNAMT>{:.2}</TRNAMT>\n", entry.signed));
        doc.push_str(&format!("<FITID>{}</FITID>\n", entry.fitid));
        if let Some(name) = &entry.name {
            doc.push_str(&format!("<NAME>{}</NAME>\n", name));
        }
        if let Some(memo) = &entry.memo {
            doc.push_str(&format!("<MEMO>{}</MEMO>\n", memo));
        }
        if let Some(check) = &entry.checknum {
            doc.push_str(&format!("<CHECKNUM>{}</CHECKNUM>\n", check));
        }
        doc.push_str("</STMTTRN>\n");
    }
    doc.push_str("</BANKTRANLIST>\n");

    if let Some(balance) = ledger {
        doc.push_str("<LEDGERBAL>\n");
        doc.push_str(&format!("<BALAMT>{:.2}</BALAMT>\n", balance));
        doc.push_str(&format!("<DTASOF>{}</DTASOF>\n", to_ofx_date(dtend)));
        doc.push_str("</LEDGERBAL>\n");
    }

    doc.push_str("</STMTRS>\n</STMTTRNRS>\n</BANKMSGSRSV1>\n</OFX>\n");
    doc
}

// ============================================================================
// ACCEPTANCE GATE
// ============================================================================

fn gate_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<([A-Z0-9]+)>([^<>]*)</([A-Z0-9]+)>$").expect("pair regex"))
}

fn gate_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<([A-Z0-9]+)>$").expect("open regex"))
}

fn gate_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^</([A-Z0-9]+)>$").expect("close regex"))
}

/// Strict re-parse of a reconstructed document. Every tag must be balanced,
/// leaf values clean, and the OFX root present. Returns the transaction
/// count so the caller can check nothing was lost.
pub fn parse_reconstructed(document: &str) -> Result<usize, String> {
    let mut stack: Vec<String> = Vec::new();
    let mut count = 0usize;
    let mut saw_root = false;

    for (i, raw) in document.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("<?xml") {
            continue;
        }

        if let Some(caps) = gate_pair_re().captures(line) {
            if caps[1] != caps[3] {
                return Err(format!("line {}: mismatched tag pair", i + 1));
            }
            if stack.is_empty() {
                return Err(format!("line {}: value outside the document root", i + 1));
            }
            continue;
        }

        if let Some(caps) = gate_open_re().captures(line) {
            if &caps[1] == "OFX" {
                saw_root = true;
            }
            if &caps[1] == "STMTTRN" {
                count += 1;
            }
            stack.push(caps[1].to_string());
            continue;
        }

        if let Some(caps) = gate_close_re().captures(line) {
            match stack.pop() {
                Some(open) if open == caps[1] => continue,
                _ => return Err(format!("line {}: unbalanced </{}>", i + 1, &caps[1])),
            }
        }

        return Err(format!("line {}: malformed markup: {}", i + 1, line));
    }

    if !stack.is_empty() {
        return Err(format!("unclosed tags at end of document: {:?}", stack));
    }
    if !saw_root {
        return Err("missing OFX root element".to_string());
    }
    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================
