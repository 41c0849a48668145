// 🧮 Value & Date Normalizer - locale-aware decimals, bounded dates
// Leaf module: every parser funnels raw tokens through here so all formats
// converge on one money/date model.

use crate::error::NormalizeError;
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

// ============================================================================
// MONETARY NORMALIZATION
// ============================================================================

/// Convert a raw monetary token to f64.
///
/// Rules, in order:
/// - keep only digits, minus, dot and comma (a "minus space" prefix thereby
///   collapses to a bare minus);
/// - the value is negative when the kept characters start or end with a
///   minus (statement exports use both positions);
/// - a comma present means comma-decimal locale: dots are thousands
///   separators, the comma becomes the decimal point;
/// - with no comma but several dots, all but the last dot are thousands
///   separators.
///
/// `"1.234,56"` → 1234.56, `"- 1.234,56"` and `"1.234,56-"` → -1234.56.
pub fn normalize_decimal(raw: &str) -> Result<f64, NormalizeError> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '-' | '.' | ','))
        .collect();

    if kept.is_empty() {
        return Err(NormalizeError::BadAmount(raw.to_string()));
    }

    let negative = kept.starts_with('-') || kept.ends_with('-');
    let mut v: String = kept.chars().filter(|c| *c != '-').collect();

    if v.contains(',') {
        v = v.replace('.', "");
        v = v.replace(',', ".");
    }
    if v.matches('.').count() > 1 {
        let parts: Vec<&str> = v.split('.').collect();
        let (last, head) = parts.split_last().expect("at least two parts");
        v = format!("{}.{}", head.concat(), last);
    }

    let parsed: f64 = v
        .parse()
        .map_err(|_| NormalizeError::BadAmount(raw.to_string()))?;

    Ok(if negative { -parsed } else { parsed })
}

/// Like [`normalize_decimal`], but rejects a zero result: a transaction
/// amount of exactly zero cannot satisfy the one-nonzero-side invariant.
/// Declared balances keep using `normalize_decimal` — a balance of zero is
/// perfectly valid.
pub fn normalize_amount(raw: &str) -> Result<f64, NormalizeError> {
    let value = normalize_decimal(raw)?;
    if value == 0.0 {
        return Err(NormalizeError::ZeroAmount(raw.to_string()));
    }
    Ok(value)
}

// ============================================================================
// DATE NORMALIZATION
// ============================================================================

/// A normalized date plus the flag telling the caller whether the original
/// token was corrupt and today's date was substituted. The substitution
/// silently reorders transactions otherwise, so it is never hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedDate {
    pub date: NaiveDate,
    pub corrected: bool,
}

fn date_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{8,14}").expect("date run regex"))
}

/// Extract the first 8-14 digit run and read it as YYYYMMDD (trailing
/// time-of-day digits ignored). A year outside [1900, reference_year + 1],
/// or month/day digits that do not form a real calendar date, substitute
/// `today` with `corrected` set. No digit run at all is a hard field failure.
pub fn normalize_date_with(raw: &str, today: NaiveDate) -> Result<NormalizedDate, NormalizeError> {
    let run = date_run_re()
        .find(raw)
        .ok_or_else(|| NormalizeError::BadDate(raw.to_string()))?
        .as_str();

    let corrected = NormalizedDate {
        date: today,
        corrected: true,
    };

    // The run is all digits, 8+ long; the slices below cannot fail to parse.
    let year: i32 = run[0..4].parse().expect("year digits");
    if year < 1900 || year > today.year() + 1 {
        return Ok(corrected);
    }

    let month: u32 = run[4..6].parse().expect("month digits");
    let day: u32 = run[6..8].parse().expect("day digits");

    Ok(match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) => NormalizedDate {
            date,
            corrected: false,
        },
        None => corrected,
    })
}

/// [`normalize_date_with`] anchored at the local current date.
pub fn normalize_date(raw: &str) -> Result<NormalizedDate, NormalizeError> {
    normalize_date_with(raw, Local::now().date_naive())
}

/// Render a date back to the OFX YYYYMMDD form used in reconstruction.
pub fn to_ofx_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

// ============================================================================
// TESTS
// ============================================================================
