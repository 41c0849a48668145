// 📄 Line-Oriented Statement Parser - tabular PDF/TXT text to raw rows
// Two fault-tolerant formats behind one configuration surface: the day-carry
// layout (two-digit day cursor carried forward) and the dated-line layout
// (full date prefix plus a declared running balance per line).

use crate::error::{ConvertError, ConvertResult, NormalizeError};
use crate::model::{Competency, RawLine, Statement, Transaction};
use crate::normalize::{normalize_amount, normalize_decimal};
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Which minus marks a debit. Source variants disagree, so this is explicit
/// per-format configuration instead of a hardcoded rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignConvention {
    /// `1.234,56-` is a debit; no marker means credit.
    TrailingMinus,
    /// `-1.234,56` is a debit; no marker means credit.
    LeadingMinus,
}

/// How the document reference token is recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentRule {
    /// The token right before the amount is always the document.
    SecondToLastToken,
    /// Only an exactly-six-digit token counts; anything else folds into the
    /// description and the document stays empty.
    SixDigitToken,
}

/// Per-format knobs for the line parsers.
#[derive(Debug, Clone)]
pub struct LineParserConfig {
    pub sign: SignConvention,
    pub document: DocumentRule,
    /// Substrings marking boilerplate lines (balance headers, banners).
    pub boilerplate: &'static [&'static str],
}

const DAY_CARRY_BOILERPLATE: &[&str] =
    &["SALDO ANT", "SALDO NA DATA", "MOVIMENTOS", "DIA HISTORICO"];

// ============================================================================
// SHARED PATTERNS
// ============================================================================

fn day_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{2})\s+(.*)").expect("day prefix regex"))
}

fn trailing_money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,3}(\.\d{3})*,\d{2}-?$").expect("trailing money regex"))
}

fn leading_money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d{1,3}(\.\d{3})*,\d{2}$").expect("leading money regex"))
}

fn money_search_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d{1,3}(\.\d{3})*,\d{2}").expect("money search regex"))
}

fn periodo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PERIODO\s*:\s*([A-ZÇ]+)\s*/\s*(\d{4})").expect("periodo regex"))
}

fn movimentos_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"MOVIMENTOS\s+([A-Z]{3})/(\d{4})").expect("movimentos regex"))
}

fn date_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}/\d{2}/\d{4}").expect("date prefix regex"))
}

/// Does the token satisfy the strict monetary pattern for this convention?
fn is_monetary(token: &str, sign: SignConvention) -> bool {
    match sign {
        SignConvention::TrailingMinus => trailing_money_re().is_match(token),
        SignConvention::LeadingMinus => leading_money_re().is_match(token),
    }
}

/// Legacy 8-bit statement bytes to text. Bank TXT/OFX exports in the wild
/// carry WINDOWS-1252 (superset of latin-1).
pub fn decode_legacy(bytes: &[u8]) -> String {
    let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    decoded.into_owned()
}

// ============================================================================
// DAY-CARRY PARSER
// ============================================================================

/// Parser for statements where a row starts with a two-digit day and
/// continuation rows inherit that day until the next marker. The statement
/// period (competency) comes from a header line; the full date is day +
/// period.
pub struct DayCarryParser {
    config: LineParserConfig,
}

impl DayCarryParser {
    pub fn new(config: LineParserConfig) -> Self {
        DayCarryParser { config }
    }

    /// Rendered-PDF text layout: document token always precedes the amount.
    pub fn banrisul_pdf() -> Self {
        DayCarryParser::new(LineParserConfig {
            sign: SignConvention::TrailingMinus,
            document: DocumentRule::SecondToLastToken,
            boilerplate: DAY_CARRY_BOILERPLATE,
        })
    }

    /// Fixed-layout TXT export: only a strict six-digit document counts.
    pub fn banrisul_txt() -> Self {
        DayCarryParser::new(LineParserConfig {
            sign: SignConvention::TrailingMinus,
            document: DocumentRule::SixDigitToken,
            boilerplate: DAY_CARRY_BOILERPLATE,
        })
    }

    /// Pre-scan for a period header: `PERIODO: JANEIRO/2025` or
    /// `MOVIMENTOS JAN/2025`.
    fn find_period(lines: &[RawLine]) -> Option<Competency> {
        for line in lines {
            if let Some(caps) = periodo_re().captures(&line.text) {
                let year: i32 = caps[2].parse().ok()?;
                return Competency::from_month_name(&caps[1], year);
            }
            if let Some(caps) = movimentos_re().captures(&line.text) {
                let year: i32 = caps[2].parse().ok()?;
                return Competency::from_month_abbrev(&caps[1], year);
            }
        }
        None
    }

    pub fn parse(&self, lines: &[RawLine], source_file: &str) -> ConvertResult<Statement> {
        let competency = Self::find_period(lines).ok_or_else(|| ConvertError::FormatUnrecognized {
            file: source_file.to_string(),
        })?;

        let mut statement = Statement::new(source_file);
        let mut current_day: Option<u32> = None;

        for line in lines {
            let text = line.text.trim();

            if text.is_empty() || self.config.boilerplate.iter().any(|b| text.contains(b)) {
                continue;
            }

            let rest = match day_prefix_re().captures(text) {
                Some(caps) => {
                    current_day = caps[1].parse().ok();
                    caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default()
                }
                None => match current_day {
                    Some(_) => text.to_string(),
                    // Header noise before the first day marker
                    None => continue,
                },
            };
            let day = current_day.expect("cursor set above");

            let tokens: Vec<&str> = rest.split_whitespace().collect();
            if tokens.len() < 2 {
                statement.skip(line, "fewer than two data tokens");
                continue;
            }

            let value_token = tokens[tokens.len() - 1];
            if !is_monetary(value_token, self.config.sign) {
                statement.skip(line, "last token is not monetary");
                continue;
            }

            let debit = value_token.ends_with('-');
            let signed = match normalize_amount(value_token.trim_end_matches('-')) {
                Ok(v) => {
                    if debit {
                        -v
                    } else {
                        v
                    }
                }
                Err(NormalizeError::ZeroAmount(_)) => {
                    statement.skip(line, "zero amount");
                    continue;
                }
                Err(_) => {
                    statement.skip(line, "unparseable amount");
                    continue;
                }
            };

            let leading = &tokens[..tokens.len() - 1];
            let (document, description) = split_document(leading, self.config.document);

            let date = match NaiveDate::from_ymd_opt(competency.year, competency.month, day) {
                Some(d) => d,
                None => {
                    statement.skip(line, "day does not exist in the statement period");
                    continue;
                }
            };

            statement.push(
                Transaction::from_signed(
                    date,
                    description,
                    document,
                    signed,
                    competency,
                    source_file.to_string(),
                ),
                None,
            );
        }

        if statement.is_empty() {
            return Err(ConvertError::FormatUnrecognized {
                file: source_file.to_string(),
            });
        }
        Ok(statement)
    }
}

/// Apply the configured document rule to the tokens before the amount.
fn split_document(leading: &[&str], rule: DocumentRule) -> (Option<String>, String) {
    match rule {
        DocumentRule::SecondToLastToken => {
            let (doc, desc) = leading.split_last().expect("at least one leading token");
            (Some((*doc).to_string()), desc.join(" "))
        }
        DocumentRule::SixDigitToken => match leading.split_last() {
            Some((doc, desc))
                if doc.len() == 6 && doc.chars().all(|c| c.is_ascii_digit()) =>
            {
                (Some((*doc).to_string()), desc.join(" "))
            }
            // No strict document token: everything folds into the description
            _ => (None, leading.join(" ")),
        },
    }
}

// ============================================================================
// DATED-LINE PARSER
// ============================================================================

/// Parser for statements where every row carries its own `dd/mm/yyyy` prefix
/// and ends with amount + declared running balance, enabling reconciliation.
pub struct DatedLineParser {
    config: LineParserConfig,
}

impl DatedLineParser {
    pub fn new(config: LineParserConfig) -> Self {
        DatedLineParser { config }
    }

    pub fn sicredi() -> Self {
        DatedLineParser::new(LineParserConfig {
            sign: SignConvention::LeadingMinus,
            document: DocumentRule::SecondToLastToken,
            boilerplate: &[],
        })
    }

    pub fn parse(&self, lines: &[RawLine], source_file: &str) -> ConvertResult<Statement> {
        self.parse_with_today(lines, source_file, Local::now().date_naive())
    }

    /// `today` anchors the date sanity bound; injectable for tests.
    pub fn parse_with_today(
        &self,
        lines: &[RawLine],
        source_file: &str,
        today: NaiveDate,
    ) -> ConvertResult<Statement> {
        let mut statement = Statement::new(source_file);

        for line in lines {
            let text = line.text.trim_end();

            if text.to_uppercase().contains("SALDO ANTERIOR") {
                if let Some(m) = money_search_re().find(text) {
                    if let Ok(v) = normalize_decimal(m.as_str()) {
                        statement.opening_balance = Some(v);
                    }
                }
                continue;
            }

            if !date_prefix_re().is_match(text) {
                continue;
            }

            let (date_str, rest) = text.split_at(10);
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            if tokens.len() < 2 {
                statement.skip(line, "fewer than two data tokens");
                continue;
            }

            let balance_token = tokens[tokens.len() - 1];
            let value_token = tokens[tokens.len() - 2];
            if !is_monetary(balance_token, self.config.sign)
                || !is_monetary(value_token, self.config.sign)
            {
                statement.skip(line, "amount or declared balance is not monetary");
                continue;
            }

            let declared = match normalize_decimal(balance_token) {
                Ok(v) => v,
                Err(_) => {
                    statement.skip(line, "unparseable declared balance");
                    continue;
                }
            };
            let signed = match normalize_amount(value_token) {
                Ok(v) => v,
                Err(NormalizeError::ZeroAmount(_)) => {
                    statement.skip(line, "zero amount");
                    continue;
                }
                Err(_) => {
                    statement.skip(line, "unparseable amount");
                    continue;
                }
            };

            let (mut date, mut corrected) =
                match NaiveDate::parse_from_str(date_str, "%d/%m/%Y") {
                    Ok(d) => (d, false),
                    Err(_) => {
                        statement.skip(line, "date prefix is not a real date");
                        continue;
                    }
                };
            if date.year() < 1900 || date.year() > today.year() + 1 {
                date = today;
                corrected = true;
            }

            let leading = &tokens[..tokens.len() - 2];
            let (document, description) = if leading.is_empty() {
                (None, String::new())
            } else {
                split_document(leading, self.config.document)
            };

            let mut tx = Transaction::from_signed(
                date,
                description,
                document,
                signed,
                Competency::from_date(date),
                source_file.to_string(),
            );
            tx.date_corrected = corrected;
            statement.push(tx, Some(declared));
        }

        if statement.is_empty() {
            return Err(ConvertError::FormatUnrecognized {
                file: source_file.to_string(),
            });
        }
        Ok(statement)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(text: &str) -> Vec<RawLine> {
        RawLine::from_text(text)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_marker_starts_transaction() {
        let text = "\
PERIODO: JANEIRO/2025
DIA HISTORICO DOCUMENTO VALOR
05 PAGAMENTO BOLETO   000123   1.234,56-";
        let st = DayCarryParser::banrisul_pdf()
            .parse(&lines_of(text), "extrato_jan.txt")
            .unwrap();

        assert_eq!(st.len(), 1);
        let tx = &st.entries[0].transaction;
        assert_eq!(tx.date, date(2025, 1, 5));
        assert_eq!(tx.description, "PAGAMENTO BOLETO");
        assert_eq!(tx.document.as_deref(), Some("000123"));
        assert_eq!(tx.debit, 1234.56);
        assert_eq!(tx.credit, 0.0);
        assert_eq!(tx.competency, Competency::new(2025, 1).unwrap());
    }

    #[test]
    fn test_continuation_lines_attach_to_day_cursor() {
        let text = "\
PERIODO: FEVEREIRO/2025
03 TED RECEBIDA 111111 2.000,00
PIX ENVIADO 222222 500,00-
07 TARIFA PACOTE 333333 35,90-";
        let st = DayCarryParser::banrisul_pdf()
            .parse(&lines_of(text), "extrato_fev.txt")
            .unwrap();

        assert_eq!(st.len(), 3);
        // Continuation line inherits day 3
        assert_eq!(st.entries[1].transaction.date, date(2025, 2, 3));
        assert_eq!(st.entries[1].transaction.debit, 500.0);
        // Next marker moves the cursor
        assert_eq!(st.entries[2].transaction.date, date(2025, 2, 7));
    }

    #[test]
    fn test_lines_before_first_day_marker_are_ignored() {
        let text = "\
PERIODO: JANEIRO/2025
AGENCIA 0042 CONTA 12345
05 PIX RECEBIDO 000001 10,00";
        let st = DayCarryParser::banrisul_pdf()
            .parse(&lines_of(text), "extrato.txt")
            .unwrap();
        assert_eq!(st.len(), 1);
        assert!(st.skipped.is_empty(), "pre-table headers are not logged");
    }

    #[test]
    fn test_boilerplate_and_non_monetary_lines() {
        let text = "\
MOVIMENTOS JAN/2025
05 SALDO ANT 1.000,00
05 PIX QR CODE 123456 250,00-
TOTAL DO DIA SEM VALOR";
        let st = DayCarryParser::banrisul_txt()
            .parse(&lines_of(text), "extrato.txt")
            .unwrap();

        assert_eq!(st.len(), 1, "boilerplate must not become a transaction");
        assert_eq!(st.skipped.len(), 1);
        assert_eq!(st.skipped[0].reason, "last token is not monetary");
    }

    #[test]
    fn test_six_digit_document_rule_folds_non_matching() {
        let text = "\
MOVIMENTOS MAR/2025
12 CHEQUE COMPENSADO 004521 890,00-
12 RENDIMENTO POUPANCA 12,34";
        let st = DayCarryParser::banrisul_txt()
            .parse(&lines_of(text), "extrato.txt")
            .unwrap();

        assert_eq!(st.entries[0].transaction.document.as_deref(), Some("004521"));
        // "POUPANCA" is not six digits: folds into the description
        let tx = &st.entries[1].transaction;
        assert_eq!(tx.document, None);
        assert_eq!(tx.description, "RENDIMENTO POUPANCA");
        assert_eq!(tx.credit, 12.34);
    }

    #[test]
    fn test_missing_period_header_is_unrecognized() {
        let text = "05 PAGAMENTO BOLETO 000123 1.234,56-";
        let err = DayCarryParser::banrisul_pdf()
            .parse(&lines_of(text), "extrato.txt")
            .unwrap_err();
        assert!(matches!(err, ConvertError::FormatUnrecognized { .. }));
    }

    #[test]
    fn test_dated_line_extraction_with_declared_balance() {
        let text = "\
SALDO ANTERIOR 1.000,00
05/01/2025 PIX RECEBIDO JOAO PIX_CRED 250,00 1.250,00
06/01/2025 PAGAMENTO TITULO 778899 -117,40 1.132,60";
        let st = DatedLineParser::sicredi()
            .parse_with_today(&lines_of(text), "sicredi_jan.txt", date(2025, 6, 1))
            .unwrap();

        assert_eq!(st.opening_balance, Some(1000.0));
        assert_eq!(st.len(), 2);

        let first = &st.entries[0];
        assert_eq!(first.transaction.credit, 250.0);
        assert_eq!(first.transaction.document.as_deref(), Some("PIX_CRED"));
        assert_eq!(first.transaction.description, "PIX RECEBIDO JOAO");
        assert_eq!(first.declared_balance, Some(1250.0));

        let second = &st.entries[1];
        assert_eq!(second.transaction.debit, 117.40);
        assert_eq!(second.declared_balance, Some(1132.60));
    }

    #[test]
    fn test_dated_line_rejects_non_monetary_tail() {
        let text = "\
05/01/2025 PIX RECEBIDO 250,00 1.250,00
05/01/2025 LINHA QUEBRADA PELA EXTRACAO 250,00";
        let st = DatedLineParser::sicredi()
            .parse_with_today(&lines_of(text), "sicredi.txt", date(2025, 6, 1))
            .unwrap();
        assert_eq!(st.len(), 1);
        assert_eq!(st.skipped.len(), 1);
    }

    #[test]
    fn test_dated_line_out_of_bound_year_is_corrected() {
        let text = "05/01/1897 ESTORNO ANTIGO -10,00 990,00";
        let today = date(2025, 6, 1);
        let st = DatedLineParser::sicredi()
            .parse_with_today(&lines_of(text), "sicredi.txt", today)
            .unwrap();
        let tx = &st.entries[0].transaction;
        assert_eq!(tx.date, today);
        assert!(tx.date_corrected, "substitution must be observable");
    }

    #[test]
    fn test_decode_legacy_windows_1252() {
        // "POUPANÇA" in WINDOWS-1252: Ç is 0xC7
        let bytes = b"POUPAN\xC7A";
        assert_eq!(decode_legacy(bytes), "POUPANÇA");
    }
}
