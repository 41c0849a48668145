// Error taxonomy. Per-record and per-file failures recover locally and end
// up in diagnostic logs; only TotalFailure aborts a run.

use thiserror::Error;

/// Failures surfaced while converting a batch of statement files.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// File inaccessible or undecodable. The batch skips it and continues.
    #[error("could not read {file}: {reason}")]
    InputUnreadable { file: String, reason: String },

    /// No transactions locatable by any strategy. Skipped, recorded.
    #[error("no transactions recognized in {file}")]
    FormatUnrecognized { file: String },

    /// A repaired OFX document failed the re-parse acceptance gate. The
    /// best-effort artifact is retained for diagnosis.
    #[error("repaired document for {file} failed validation: {reason}")]
    RepairRejected {
        file: String,
        reason: String,
        artifact: String,
    },

    /// Zero usable transactions across the entire batch. Fatal; no output
    /// is written.
    #[error("no usable transactions found in any input file")]
    TotalFailure,

    #[error("failed to write output: {0}")]
    OutputWrite(String),
}

/// Per-record field failures. The record is dropped or flagged; the file
/// keeps processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("unparseable monetary value: {0:?}")]
    BadAmount(String),

    /// A zero amount cannot satisfy the one-nonzero-side invariant.
    #[error("amount is zero: {0:?}")]
    ZeroAmount(String),

    #[error("no usable date token in {0:?}")]
    BadDate(String),
}

pub type ConvertResult<T> = Result<T, ConvertError>;
