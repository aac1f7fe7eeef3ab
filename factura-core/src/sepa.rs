//! SEPA direct debits: mandate checks, installment plans, payer coverage and
//! pain.008 files.
pub mod document;
pub mod installments;
pub mod mandate;
pub mod payers;

pub use document::{
    DirectDebitGenerator, DirectDebitPayment, DirectDebitRequest, PAIN_008_NS, SepaFile, file_name,
};
pub use installments::{Installment, SequenceType, split_installments};
pub use mandate::{
    BankAccount, Creditor, compact_iban, is_valid_bic, is_valid_iban, is_valid_mandate_reference,
};
pub use payers::{CoverageType, Payer, PayerType, PaymentMethod, validate_payer_coverage};

use crate::invoice::ValidationError;
use quick_xml::se::SeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SepaError {
    #[error("invalid direct debit: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to serialize pain.008 document: {0}")]
    Xml(#[from] SeError),
}

impl SepaError {
    pub fn is_validation(&self) -> bool {
        matches!(self, SepaError::Validation(_))
    }
}
