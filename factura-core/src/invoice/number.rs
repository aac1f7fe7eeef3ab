//! Business invoice numbers.
use chrono::{Datelike, NaiveDate};

/// Format `<prefix>-<year>-<seq:06>`.
///
/// # Examples
/// ```rust
/// use chrono::NaiveDate;
/// use factura_core::invoice::number::format_invoice_number;
///
/// let date = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
/// assert_eq!(format_invoice_number("FAC", date, 42), "FAC-2026-000042");
/// ```
pub fn format_invoice_number(prefix: &str, issue_date: NaiveDate, sequence: u64) -> String {
    format!("{prefix}-{}-{sequence:06}", issue_date.year())
}
