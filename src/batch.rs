// Batch driver: one synchronous pass over a fixed file set. Per-file
// failures are caught and recorded; only a run with zero usable transactions
// aborts. Files are processed in sorted name order so "first seen" is
// deterministic regardless of how the set was collected.

use crate::dedup::{consolidate, DedupReport};
use crate::error::{ConvertError, ConvertResult};
use crate::lines::{decode_legacy, DatedLineParser, DayCarryParser};
use crate::model::{RawLine, SkippedLine, Statement, Transaction};
use crate::ofx::{OfxRepairEngine, RepairStrategy};
use crate::recon::{ReconciliationEngine, ReconciliationReport};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// SOURCE DETECTION
// ============================================================================

/// Which parser a file routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Day-carry statement text (TXT export or pre-extracted PDF text).
    DayCarryText,
    /// Dated-line statement text with declared running balances.
    DatedLineText,
    /// OFX/XML document going through the repair engine.
    Ofx,
}

/// Detect the source kind from the file name. Returns None for files this
/// engine does not handle.
pub fn detect_source(path: &Path) -> Option<SourceKind> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();

    if filename.contains("sicredi") {
        return Some(SourceKind::DatedLineText);
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "ofx" | "xml" => Some(SourceKind::Ofx),
        "txt" => Some(SourceKind::DayCarryText),
        _ => None,
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Converted,
    Failed,
}

/// Outcome for one input file, including its skip/ambiguity log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub file: String,
    pub status: FileStatus,
    pub transactions: usize,
    pub strategy: Option<RepairStrategy>,
    pub skipped: Vec<SkippedLine>,
    pub error: Option<String>,
}

/// Everything one run produced. The consolidated transactions go to the
/// exporter; the rest is the diagnostics artifact.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    pub dedup: DedupReport,
    pub reconciliation: Vec<ReconciliationReport>,
    #[serde(skip)]
    pub transactions: Vec<Transaction>,
}

impl RunReport {
    pub fn converted_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Converted)
            .count()
    }

    pub fn failed_files(&self) -> usize {
        self.files.len() - self.converted_files()
    }
}

// ============================================================================
// BATCH CONVERTER
// ============================================================================

struct ConvertedFile {
    statement: Statement,
    strategy: Option<RepairStrategy>,
}

pub struct BatchConverter {
    recon: ReconciliationEngine,
}

impl BatchConverter {
    pub fn new() -> Self {
        BatchConverter {
            recon: ReconciliationEngine::new(),
        }
    }

    /// Convert a fixed set of files into one consolidated, deduplicated,
    /// reconciled run report. Fails only on `TotalFailure`.
    pub fn run(&self, files: &[PathBuf]) -> ConvertResult<RunReport> {
        let mut sorted: Vec<PathBuf> = files.to_vec();
        sorted.sort();

        let mut reports = Vec::new();
        let mut statements = Vec::new();
        let mut reconciliation = Vec::new();

        for path in &sorted {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("(sem nome)")
                .to_string();

            match self.convert_file(path, &name) {
                Ok(converted) => {
                    let recon_report = self.recon.reconcile(&converted.statement);
                    if !recon_report.results.is_empty() {
                        reconciliation.push(recon_report);
                    }
                    reports.push(FileReport {
                        file: name,
                        status: FileStatus::Converted,
                        transactions: converted.statement.len(),
                        strategy: converted.strategy,
                        skipped: converted.statement.skipped.clone(),
                        error: None,
                    });
                    statements.push(converted.statement);
                }
                Err(err) => reports.push(FileReport {
                    file: name,
                    status: FileStatus::Failed,
                    transactions: 0,
                    strategy: None,
                    skipped: Vec::new(),
                    error: Some(err.to_string()),
                }),
            }
        }

        let (transactions, dedup) = consolidate(&statements);
        if transactions.is_empty() {
            return Err(ConvertError::TotalFailure);
        }

        Ok(RunReport {
            files: reports,
            dedup,
            reconciliation,
            transactions,
        })
    }

    /// Entry point for pre-extracted PDF text: one string per page, already
    /// pulled out of the PDF by the external extractor.
    pub fn convert_extracted_pages(
        &self,
        pages: &[String],
        source_file: &str,
    ) -> ConvertResult<Statement> {
        let lines = RawLine::from_pages(pages);
        DayCarryParser::banrisul_pdf().parse(&lines, source_file)
    }

    fn convert_file(&self, path: &Path, name: &str) -> ConvertResult<ConvertedFile> {
        let kind = detect_source(path).ok_or_else(|| ConvertError::FormatUnrecognized {
            file: name.to_string(),
        })?;

        let bytes = fs::read(path).map_err(|e| ConvertError::InputUnreadable {
            file: name.to_string(),
            reason: e.to_string(),
        })?;

        match kind {
            SourceKind::DayCarryText => {
                let text = decode_legacy(&bytes);
                let lines = RawLine::from_text(&text);
                let statement = DayCarryParser::banrisul_txt().parse(&lines, name)?;
                Ok(ConvertedFile {
                    statement,
                    strategy: None,
                })
            }
            SourceKind::DatedLineText => {
                let text = decode_legacy(&bytes);
                let lines = RawLine::from_text(&text);
                let statement = DatedLineParser::sicredi().parse(&lines, name)?;
                Ok(ConvertedFile {
                    statement,
                    strategy: None,
                })
            }
            SourceKind::Ofx => {
                let outcome = OfxRepairEngine::new().repair(&bytes, name)?;
                Ok(ConvertedFile {
                    statement: outcome.statement,
                    strategy: Some(outcome.strategy),
                })
            }
        }
    }
}

impl Default for BatchConverter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Single buffered write of the consolidated sequence. Column layout matches
/// the consolidated sheet the exporter expects.
pub fn write_consolidated_csv(path: &Path, transactions: &[Transaction]) -> ConvertResult<()> {
    let mut writer =
        csv::Writer::from_path(path).map_err(|e| ConvertError::OutputWrite(e.to_string()))?;

    writer
        .write_record([
            "DATA",
            "COMPETENCIA",
            "HISTORICO",
            "DOCUMENTO",
            "DEBITO",
            "CREDITO",
            "ARQUIVO",
            "CHAVE",
        ])
        .map_err(|e| ConvertError::OutputWrite(e.to_string()))?;

    for tx in transactions {
        writer
            .write_record([
                tx.date.format("%d/%m/%Y").to_string(),
                tx.competency.to_string(),
                tx.description.clone(),
                tx.document.clone().unwrap_or_default(),
                format!("{:.2}", tx.debit),
                format!("{:.2}", tx.credit),
                tx.source_file.clone(),
                tx.dedup_key(),
            ])
            .map_err(|e| ConvertError::OutputWrite(e.to_string()))?;
    }

    writer
        .flush()
        .map_err(|e| ConvertError::OutputWrite(e.to_string()))
}

/// Diagnostics artifact: per-file status and skip logs, dedup counts,
/// reconciliation differences.
pub fn write_diagnostics_json(path: &Path, report: &RunReport) -> ConvertResult<()> {
    let file = fs::File::create(path).map_err(|e| ConvertError::OutputWrite(e.to_string()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)
        .map_err(|e| ConvertError::OutputWrite(e.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Scratch directory for batch tests; removed on drop.
    struct TestDir(PathBuf);

    impl TestDir {
        fn new() -> Self {
            let dir = std::env::temp_dir()
                .join(format!("extrato-test-{}", uuid::Uuid::new_v4().simple()));
            fs::create_dir_all(&dir).unwrap();
            TestDir(dir)
        }

        fn write(&self, name: &str, content: &str) -> PathBuf {
            let path = self.0.join(name);
            fs::write(&path, content).unwrap();
            path
        }
    }

    impl Drop for TestDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    const TXT_STATEMENT: &str = "\
MOVIMENTOS JAN/2025
05 PAGAMENTO BOLETO 000123 1.234,56-
07 PIX RECEBIDO 000124 500,00
";

    const OFX_STATEMENT: &str = "\
<OFX>
<BANKTRANLIST>
<STMTTRN>
<TRNTYPE>CREDIT
<DTPOSTED>20250110
<TRNAMT>75,00
<FITID>FIT-A1
<MEMO>TED RECEBIDA
</STMTTRN>
</BANKTRANLIST>
</OFX>
";

    const SICREDI_STATEMENT: &str = "\
SALDO ANTERIOR 1.000,00
12/01/2025 PIX RECEBIDO JOAO PIX_CRED 250,00 1.250,00
13/01/2025 PAGAMENTO TITULO 778899 -117,40 1.132,00
";

    #[test]
    fn test_detect_source() {
        assert_eq!(
            detect_source(Path::new("extrato_sicredi_jan.txt")),
            Some(SourceKind::DatedLineText)
        );
        assert_eq!(
            detect_source(Path::new("conta_corrente.ofx")),
            Some(SourceKind::Ofx)
        );
        assert_eq!(
            detect_source(Path::new("extrato_banrisul.TXT")),
            Some(SourceKind::DayCarryText)
        );
        assert_eq!(detect_source(Path::new("planilha.xlsx")), None);
    }

    #[test]
    fn test_run_consolidates_across_formats() {
        let dir = TestDir::new();
        let files = vec![
            dir.write("a_banrisul.txt", TXT_STATEMENT),
            dir.write("b_conta.ofx", OFX_STATEMENT),
            dir.write("c_sicredi.txt", SICREDI_STATEMENT),
        ];

        let report = BatchConverter::new().run(&files).unwrap();

        assert_eq!(report.converted_files(), 3);
        assert_eq!(report.failed_files(), 0);
        assert_eq!(report.transactions.len(), 5);
        assert_eq!(report.dedup.removed, 0);

        // Sorted by date across files
        let dates: Vec<_> = report.transactions.iter().map(|t| t.date).collect();
        let mut expected = dates.clone();
        expected.sort();
        assert_eq!(dates, expected);

        // The dated-line file produced reconciliation results, including the
        // deliberate 0,60 gap on its last line
        assert_eq!(report.reconciliation.len(), 1);
        let mismatches = report.reconciliation[0].mismatches(0.005);
        assert_eq!(mismatches.len(), 1);
        assert!((mismatches[0].difference - (-0.60)).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_file_is_deduplicated() {
        let dir = TestDir::new();
        let files = vec![
            dir.write("a_banrisul.txt", TXT_STATEMENT),
            dir.write("b_banrisul_copia.txt", TXT_STATEMENT),
        ];

        let report = BatchConverter::new().run(&files).unwrap();

        assert_eq!(report.transactions.len(), 2);
        assert_eq!(report.dedup.total_parsed, 4);
        assert_eq!(report.dedup.removed, 2);
        // First-seen wins: the alphabetically first file
        assert!(report
            .transactions
            .iter()
            .all(|t| t.source_file == "a_banrisul.txt"));
    }

    #[test]
    fn test_per_file_failure_does_not_stop_the_batch() {
        let dir = TestDir::new();
        let files = vec![
            dir.write("a_banrisul.txt", TXT_STATEMENT),
            dir.write("b_quebrado.txt", "NADA RECONHECIVEL AQUI\n"),
        ];

        let report = BatchConverter::new().run(&files).unwrap();

        assert_eq!(report.converted_files(), 1);
        assert_eq!(report.failed_files(), 1);
        let failed = report
            .files
            .iter()
            .find(|f| f.status == FileStatus::Failed)
            .unwrap();
        assert!(failed.error.as_deref().unwrap().contains("b_quebrado.txt"));
    }

    #[test]
    fn test_zero_transactions_overall_is_fatal() {
        let dir = TestDir::new();
        let files = vec![
            dir.write("a_quebrado.txt", "NADA\n"),
            dir.write("b_vazio.ofx", "<OFX></OFX>\n"),
        ];

        let err = BatchConverter::new().run(&files).unwrap_err();
        assert!(matches!(err, ConvertError::TotalFailure));
    }

    #[test]
    fn test_missing_file_is_input_unreadable_not_fatal() {
        let dir = TestDir::new();
        let files = vec![
            dir.write("a_banrisul.txt", TXT_STATEMENT),
            dir.0.join("nao_existe.txt"),
        ];

        let report = BatchConverter::new().run(&files).unwrap();
        assert_eq!(report.failed_files(), 1);
        assert_eq!(report.converted_files(), 1);
    }

    #[test]
    fn test_convert_extracted_pages() {
        let pages = vec![
            "PERIODO: JANEIRO/2025\nDIA HISTORICO DOCUMENTO VALOR".to_string(),
            "05 PAGAMENTO BOLETO 000123 1.234,56-".to_string(),
        ];
        let statement = BatchConverter::new()
            .convert_extracted_pages(&pages, "extrato_jan.pdf")
            .unwrap();

        assert_eq!(statement.len(), 1);
        assert_eq!(statement.entries[0].transaction.debit, 1234.56);
        // Lineage survives the page split
        assert_eq!(statement.source_file, "extrato_jan.pdf");
    }

    #[test]
    fn test_consolidated_csv_written_once() {
        let dir = TestDir::new();
        let files = vec![dir.write("a_banrisul.txt", TXT_STATEMENT)];
        let report = BatchConverter::new().run(&files).unwrap();

        let out = dir.0.join("consolidado.csv");
        write_consolidated_csv(&out, &report.transactions).unwrap();

        let written = fs::read_to_string(&out).unwrap();
        let mut lines = written.lines();
        assert!(lines.next().unwrap().starts_with("DATA,COMPETENCIA"));
        assert_eq!(lines.count(), report.transactions.len());
        assert!(written.contains("05/01/2025"));
        assert!(written.contains("1234.56"));

        let diag = dir.0.join("diagnostico.json");
        write_diagnostics_json(&diag, &report).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&diag).unwrap()).unwrap();
        assert_eq!(json["dedup"]["removed"], 0);
    }
}
