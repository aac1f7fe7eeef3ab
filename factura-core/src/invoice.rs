//! Invoice domain types, totals and status lifecycle.
pub mod canonical;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod number;
pub mod pdf;
mod qr;
pub mod sign;
pub mod xml;
pub use qr::{QrCodeError, QrCodeGenerator, QrMatrix, QrPayload, QrResult, verification_url};

use chrono::{DateTime, NaiveDate, Utc};
use iso_currency::Currency;
use isocountry::CountryCode;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured validation error with field-level issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invoice validation failed: {}", describe_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn single(field: InvoiceField, kind: ValidationKind) -> Self {
        Self::new(vec![ValidationIssue {
            field,
            kind,
            item_index: None,
        }])
    }

    pub fn has(&self, field: InvoiceField, kind: ValidationKind) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.field == field && issue.kind == kind)
    }
}

fn describe_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| match issue.item_index {
            Some(index) => format!("{:?} {:?} (item {index})", issue.field, issue.kind),
            None => format!("{:?} {:?}", issue.field, issue.kind),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub field: InvoiceField,
    pub kind: ValidationKind,
    pub item_index: Option<usize>,
}

#[non_exhaustive]
/// Field associated with a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InvoiceField {
    IssuerId,
    RecipientId,
    DueDate,
    Items,
    ItemDescription,
    ItemQuantity,
    ItemUnitPrice,
    ItemTaxRate,
    Iban,
    Bic,
    AccountHolder,
    MandateReference,
    Amount,
    Installments,
    Coverage,
    BankAccount,
}

#[non_exhaustive]
/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationKind {
    Missing,
    Empty,
    InvalidFormat,
    OutOfRange,
    Mismatch,
    UnknownReference,
}

/// Store-assigned invoice key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub u64);

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Invoice lifecycle state.
///
/// Transitions only move forward:
/// `Draft -> Signed -> Submitted | SubmissionFailed`, a failed submission can
/// be resubmitted, and `Cancelled` is reachable only before submission.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::InvoiceStatus;
///
/// assert!(InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Signed));
/// assert!(!InvoiceStatus::Submitted.can_transition_to(InvoiceStatus::Draft));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Signed,
    Submitted,
    SubmissionFailed,
    Cancelled,
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Signed => "signed",
            InvoiceStatus::Submitted => "submitted",
            InvoiceStatus::SubmissionFailed => "submission_failed",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Draft, Signed)
                | (Draft, Cancelled)
                | (Signed, Submitted)
                | (Signed, SubmissionFailed)
                | (Signed, Cancelled)
                | (SubmissionFailed, Submitted)
                | (SubmissionFailed, SubmissionFailed)
        )
    }

    /// Validate a transition, returning the new status.
    ///
    /// # Errors
    /// Returns [`TransitionError`] when the move is not allowed.
    pub fn transition(self, next: InvoiceStatus) -> Result<InvoiceStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    /// Whether the pipeline has no further automatic step for this status.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Submitted | InvoiceStatus::SubmissionFailed | InvoiceStatus::Cancelled
        )
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issuer or recipient, owned by the surrounding ERP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub id: String,
    pub name: String,
    pub tax_id: String,
    pub country_code: CountryCode,
}

impl Party {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tax_id: impl Into<String>,
        country_code: CountryCode,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tax_id: tax_id.into(),
            country_code,
        }
    }
}

fn default_currency() -> Currency {
    Currency::EUR
}

/// Invoice creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    pub issuer_id: String,
    pub recipient_id: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default = "default_currency")]
    pub currency: Currency,
    pub items: Vec<NewInvoiceItem>,
}

/// Line item as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoiceItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

impl NewInvoiceItem {
    pub fn new(
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        tax_rate: Decimal,
    ) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
            tax_rate,
        }
    }

    pub fn net_amount(&self) -> Decimal {
        round_money(self.quantity * self.unit_price)
    }

    pub fn tax_amount(&self) -> Decimal {
        round_money(self.quantity * self.unit_price * self.tax_rate / Decimal::ONE_HUNDRED)
    }

    pub fn total_amount(&self) -> Decimal {
        self.net_amount() + self.tax_amount()
    }
}

impl NewInvoice {
    /// Check the request before anything is persisted.
    ///
    /// # Errors
    /// Returns every problem found as a single [`ValidationError`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();
        let mut push = |field, kind, item_index| {
            issues.push(ValidationIssue {
                field,
                kind,
                item_index,
            })
        };

        if self.issuer_id.trim().is_empty() {
            push(InvoiceField::IssuerId, ValidationKind::Empty, None);
        }
        if self.recipient_id.trim().is_empty() {
            push(InvoiceField::RecipientId, ValidationKind::Empty, None);
        }
        if self.due_date < self.issue_date {
            push(InvoiceField::DueDate, ValidationKind::OutOfRange, None);
        }
        if self.items.is_empty() {
            push(InvoiceField::Items, ValidationKind::Missing, None);
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.description.trim().is_empty() {
                push(InvoiceField::ItemDescription, ValidationKind::Empty, Some(index));
            }
            if item.quantity <= Decimal::ZERO {
                push(InvoiceField::ItemQuantity, ValidationKind::OutOfRange, Some(index));
            }
            if item.unit_price < Decimal::ZERO {
                push(InvoiceField::ItemUnitPrice, ValidationKind::OutOfRange, Some(index));
            }
            if item.tax_rate < Decimal::ZERO || item.tax_rate > Decimal::ONE_HUNDRED {
                push(InvoiceField::ItemTaxRate, ValidationKind::OutOfRange, Some(index));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(issues))
        }
    }
}

/// Invoice-level totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub total_amount: Decimal,
    pub tax_amount: Decimal,
}

/// Sum item totals and taxes. An empty list yields zero totals.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::{calculate_totals, NewInvoiceItem};
/// use rust_decimal::Decimal;
///
/// let items = vec![NewInvoiceItem::new("Tuition", Decimal::from(2), Decimal::from(100), Decimal::from(21))];
/// let totals = calculate_totals(&items);
/// assert_eq!(totals.total_amount, Decimal::from(242));
/// assert_eq!(totals.tax_amount, Decimal::from(42));
/// ```
pub fn calculate_totals(items: &[NewInvoiceItem]) -> InvoiceTotals {
    items.iter().fold(
        InvoiceTotals {
            total_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
        },
        |acc, item| InvoiceTotals {
            total_amount: acc.total_amount + item.total_amount(),
            tax_amount: acc.tax_amount + item.tax_amount(),
        },
    )
}

/// Round to the currency minor unit, midpoint away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Persisted invoice row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub aeat_id: String,
    pub issuer_id: String,
    pub recipient_id: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: Currency,
    pub total_amount: Decimal,
    pub tax_amount: Decimal,
    pub qr_code: Option<String>,
    pub digital_signature: Option<String>,
    pub signature_date: Option<DateTime<Utc>>,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn net_amount(&self) -> Decimal {
        self.total_amount - self.tax_amount
    }
}

/// Persisted line item. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    pub invoice_id: InvoiceId,
    pub position: u32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

impl InvoiceItem {
    pub fn net_amount(&self) -> Decimal {
        self.total_amount - self.tax_amount
    }
}

/// Outcome recorded for a single submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Accepted,
    Rejected,
}

/// Append-only audit record of an authority submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSubmission {
    pub invoice_id: InvoiceId,
    pub status: SubmissionStatus,
    pub response_code: Option<String>,
    pub response_message: Option<String>,
    pub retry_count: u32,
    pub submitted_at: DateTime<Utc>,
}
