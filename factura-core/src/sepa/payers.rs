use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::mandate::BankAccount;
use crate::invoice::{InvoiceField, ValidationError, ValidationIssue, ValidationKind, round_money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayerType {
    Student,
    Scholarship,
    Government,
    Institution,
    Bank,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    DirectDebit,
    Transfer,
    Cash,
    Card,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageType {
    Percentage,
    Amount,
}

/// One party sharing an enrollment fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payer {
    pub name: String,
    #[serde(rename = "type")]
    pub payer_type: PayerType,
    pub payment_method: PaymentMethod,
    pub coverage_type: CoverageType,
    pub coverage: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<BankAccount>,
}

impl Payer {
    /// Exact, unrounded contribution to `fee_total`.
    pub fn contribution(&self, fee_total: Decimal) -> Decimal {
        match self.coverage_type {
            CoverageType::Percentage => fee_total * self.coverage / Decimal::ONE_HUNDRED,
            CoverageType::Amount => self.coverage,
        }
    }
}

/// Check that `payers` cover `fee_total` to the cent and that every direct
/// debit payer carries a usable bank account.
///
/// Returns each payer's contribution in cents, in input order, adding up to
/// `fee_total` exactly.
pub fn validate_payer_coverage(
    fee_total: Decimal,
    payers: &[Payer],
) -> Result<Vec<Decimal>, ValidationError> {
    if payers.is_empty() {
        return Err(ValidationError::single(
            InvoiceField::Coverage,
            ValidationKind::Missing,
        ));
    }

    let mut issues = Vec::new();
    for (index, payer) in payers.iter().enumerate() {
        let out_of_range = payer.coverage.is_sign_negative()
            || (payer.coverage_type == CoverageType::Percentage
                && payer.coverage > Decimal::ONE_HUNDRED);
        if out_of_range {
            issues.push(ValidationIssue {
                field: InvoiceField::Coverage,
                kind: ValidationKind::OutOfRange,
                item_index: Some(index),
            });
        }
        if payer.payment_method == PaymentMethod::DirectDebit {
            match &payer.bank_account {
                Some(account) => issues.extend(account.issues(Some(index))),
                None => issues.push(ValidationIssue {
                    field: InvoiceField::BankAccount,
                    kind: ValidationKind::Missing,
                    item_index: Some(index),
                }),
            }
        }
    }

    let covered: Decimal = payers.iter().map(|p| p.contribution(fee_total)).sum();
    if round_money(covered) != round_money(fee_total) {
        issues.push(ValidationIssue {
            field: InvoiceField::Coverage,
            kind: ValidationKind::Mismatch,
            item_index: None,
        });
    }

    if !issues.is_empty() {
        return Err(ValidationError::new(issues));
    }
    let mut shares: Vec<Decimal> = payers
        .iter()
        .map(|p| round_money(p.contribution(fee_total)))
        .collect();
    // Rounding leftovers go to the last percentage payer (or the last payer).
    let leftover = round_money(fee_total) - shares.iter().copied().sum::<Decimal>();
    if !leftover.is_zero() {
        let target = payers
            .iter()
            .rposition(|p| p.coverage_type == CoverageType::Percentage)
            .unwrap_or(payers.len() - 1);
        shares[target] += leftover;
    }
    Ok(shares)
}
