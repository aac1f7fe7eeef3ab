//! Accounts, mandates and identifier checks.
use chrono::NaiveDate;
use isocountry::CountryCode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::invoice::{InvoiceField, ValidationError, ValidationIssue, ValidationKind};

static IBAN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}[0-9]{2}[A-Z0-9]{1,30}$").expect("valid IBAN regex"));
static BIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z]{6}[A-Z0-9]{2}([A-Z0-9]{3})?$").expect("valid BIC regex")
});
// SEPA identifier charset, at most 35 characters, no blanks.
static MANDATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9/\-?:().,'+]{1,35}$").expect("valid mandate regex")
});

/// Remove the blanks people type into IBANs.
pub fn compact_iban(iban: &str) -> String {
    iban.chars().filter(|c| !c.is_whitespace()).collect()
}

/// ISO 13616 check: format, ISO 3166 country prefix and mod-97 checksum.
///
/// # Examples
/// ```rust
/// use factura_core::sepa::is_valid_iban;
///
/// assert!(is_valid_iban("DE89370400440532013000"));
/// assert!(is_valid_iban("ES91 2100 0418 4502 0005 1332"));
/// assert!(!is_valid_iban("12345"));
/// ```
pub fn is_valid_iban(iban: &str) -> bool {
    let iban = compact_iban(iban);
    IBAN_PATTERN.is_match(&iban)
        && CountryCode::for_alpha2(&iban[..2]).is_ok()
        && iban_mod97(&iban) == 1
}

fn iban_mod97(iban: &str) -> u32 {
    let (head, tail) = iban.split_at(4);
    tail.chars()
        .chain(head.chars())
        .fold(0u32, |acc, c| match c.to_digit(36) {
            Some(value) if value >= 10 => (acc * 100 + value) % 97,
            Some(value) => (acc * 10 + value) % 97,
            None => acc,
        })
}

/// BIC in upper case, 8 or 11 characters.
pub fn is_valid_bic(bic: &str) -> bool {
    BIC_PATTERN.is_match(bic.trim())
}

/// Mandate reference usable verbatim as `MndtId`.
pub fn is_valid_mandate_reference(reference: &str) -> bool {
    MANDATE_PATTERN.is_match(reference.trim())
}

/// Payer bank account with its direct-debit mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub iban: String,
    pub bic: String,
    pub account_holder: String,
    pub mandate_reference: String,
    pub mandate_date: NaiveDate,
}

impl BankAccount {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let issues = self.issues(None);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(issues))
        }
    }

    pub(crate) fn issues(&self, index: Option<usize>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut push = |field, kind| {
            issues.push(ValidationIssue {
                field,
                kind,
                item_index: index,
            })
        };
        if !is_valid_iban(&self.iban) {
            push(InvoiceField::Iban, ValidationKind::InvalidFormat);
        }
        if !is_valid_bic(&self.bic) {
            push(InvoiceField::Bic, ValidationKind::InvalidFormat);
        }
        if self.account_holder.trim().is_empty() {
            push(InvoiceField::AccountHolder, ValidationKind::Empty);
        }
        if self.mandate_reference.trim().is_empty() {
            push(InvoiceField::MandateReference, ValidationKind::Empty);
        } else if !is_valid_mandate_reference(&self.mandate_reference) {
            push(InvoiceField::MandateReference, ValidationKind::InvalidFormat);
        }
        issues
    }

    pub fn iban(&self) -> String {
        compact_iban(&self.iban)
    }
}

/// Collecting institution (the school).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creditor {
    pub name: String,
    pub iban: String,
    pub bic: String,
    /// SEPA creditor scheme identifier, e.g. `ES12ZZZB12345678`.
    pub creditor_id: String,
}

impl Creditor {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();
        if !is_valid_iban(&self.iban) {
            issues.push(issue(InvoiceField::Iban, ValidationKind::InvalidFormat));
        }
        if !is_valid_bic(&self.bic) {
            issues.push(issue(InvoiceField::Bic, ValidationKind::InvalidFormat));
        }
        if self.name.trim().is_empty() {
            issues.push(issue(InvoiceField::AccountHolder, ValidationKind::Empty));
        }
        if self.creditor_id.trim().is_empty() {
            issues.push(issue(InvoiceField::MandateReference, ValidationKind::Empty));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(issues))
        }
    }
}

fn issue(field: InvoiceField, kind: ValidationKind) -> ValidationIssue {
    ValidationIssue {
        field,
        kind,
        item_index: None,
    }
}
