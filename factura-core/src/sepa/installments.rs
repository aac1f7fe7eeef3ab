use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::invoice::{InvoiceField, ValidationError, ValidationKind};

/// pain.008 sequence type of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SequenceType {
    #[serde(rename = "OOFF")]
    OneOff,
    #[serde(rename = "FRST")]
    First,
    #[serde(rename = "RCUR")]
    Recurring,
}

impl SequenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceType::OneOff => "OOFF",
            SequenceType::First => "FRST",
            SequenceType::Recurring => "RCUR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Installment {
    /// 1-based.
    pub index: u32,
    pub count: u32,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub sequence: SequenceType,
}

/// Split `total` into `count` monthly collections starting at `first_due`.
///
/// Every installment carries `floor(total / count)` cents and the last one
/// takes the remainder, so the amounts add up to `total` exactly.
///
/// # Examples
/// ```rust
/// use chrono::NaiveDate;
/// use factura_core::sepa::split_installments;
/// use rust_decimal::Decimal;
///
/// let first = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
/// let parts = split_installments(Decimal::new(10000, 2), 3, first).unwrap();
/// let amounts: Vec<String> = parts.iter().map(|p| p.amount.to_string()).collect();
/// assert_eq!(amounts, ["33.33", "33.33", "33.34"]);
/// ```
pub fn split_installments(
    total: Decimal,
    count: u32,
    first_due: NaiveDate,
) -> Result<Vec<Installment>, ValidationError> {
    if count == 0 {
        return Err(ValidationError::single(
            InvoiceField::Installments,
            ValidationKind::OutOfRange,
        ));
    }
    check_amount(total)?;
    let total_cents = (total * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| ValidationError::single(InvoiceField::Amount, ValidationKind::OutOfRange))?;
    let base = total_cents / i64::from(count);
    if base == 0 {
        // fewer cents than installments
        return Err(ValidationError::single(
            InvoiceField::Installments,
            ValidationKind::OutOfRange,
        ));
    }
    let last = total_cents - base * i64::from(count - 1);

    (0..count)
        .map(|k| {
            let cents = if k + 1 == count { last } else { base };
            let due_date = first_due
                .checked_add_months(Months::new(k))
                .ok_or_else(|| {
                    ValidationError::single(InvoiceField::DueDate, ValidationKind::OutOfRange)
                })?;
            let sequence = match (count, k) {
                (1, _) => SequenceType::OneOff,
                (_, 0) => SequenceType::First,
                _ => SequenceType::Recurring,
            };
            Ok(Installment {
                index: k + 1,
                count,
                amount: Decimal::new(cents, 2),
                due_date,
                sequence,
            })
        })
        .collect()
}

/// A collectable amount: positive and in whole cents.
pub(crate) fn check_amount(amount: Decimal) -> Result<(), ValidationError> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::single(
            InvoiceField::Amount,
            ValidationKind::OutOfRange,
        ));
    }
    if amount.normalize().scale() > 2 {
        return Err(ValidationError::single(
            InvoiceField::Amount,
            ValidationKind::InvalidFormat,
        ));
    }
    Ok(())
}
