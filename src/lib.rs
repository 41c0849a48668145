// Extrato - statement normalization and repair engine
// Exposes all modules for use in the CLI, tests, and external exporters

pub mod batch;
pub mod dedup;
pub mod error;
pub mod lines;
pub mod model;
pub mod normalize;
pub mod ofx;
pub mod recon;

// Re-export commonly used types
pub use batch::{
    detect_source, write_consolidated_csv, write_diagnostics_json, BatchConverter, FileReport,
    FileStatus, RunReport, SourceKind,
};
pub use dedup::{consolidate, DedupIndex, DedupReport};
pub use error::{ConvertError, ConvertResult, NormalizeError};
pub use lines::{
    decode_legacy, DatedLineParser, DayCarryParser, DocumentRule, LineParserConfig, SignConvention,
};
pub use model::{Competency, RawLine, SkippedLine, Statement, StatementEntry, Transaction};
pub use normalize::{
    normalize_amount, normalize_date, normalize_date_with, normalize_decimal, NormalizedDate,
};
pub use ofx::{IdGenerator, OfxRepairEngine, RepairOutcome, RepairStrategy, UuidIds};
pub use recon::{ReconciliationEngine, ReconciliationReport, ReconciliationResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
