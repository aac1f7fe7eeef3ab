//! Invoice persistence.
//!
//! [`InvoiceStore`] is the seam to the relational database owned by the ERP.
//! [`MemoryStore`] enforces the same constraints in memory.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::invoice::{
    Invoice, InvoiceId, InvoiceItem, InvoiceStatus, InvoiceSubmission, NewInvoiceItem, Party,
    TransitionError,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invoice number {0} already exists")]
    DuplicateInvoiceNumber(String),
    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Invoice row before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftInvoice {
    pub invoice_number: String,
    pub aeat_id: String,
    pub issuer_id: String,
    pub recipient_id: String,
    pub issue_date: chrono::NaiveDate,
    pub due_date: chrono::NaiveDate,
    pub currency: iso_currency::Currency,
    pub total_amount: rust_decimal::Decimal,
    pub tax_amount: rust_decimal::Decimal,
    pub items: Vec<NewInvoiceItem>,
}

/// Signature artifacts written when an invoice becomes `signed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub qr_code: String,
    pub digital_signature: String,
    pub signature_date: DateTime<Utc>,
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Atomically reserve the next invoice sequence number.
    async fn next_invoice_sequence(&self) -> Result<u64, StoreError>;

    /// Insert the invoice in `draft` together with its items.
    async fn insert_draft(&self, draft: DraftInvoice) -> Result<Invoice, StoreError>;

    async fn invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    async fn invoice_by_number(&self, number: &str) -> Result<Option<Invoice>, StoreError>;

    async fn items(&self, id: InvoiceId) -> Result<Vec<InvoiceItem>, StoreError>;

    /// Record signature artifacts and move `draft -> signed`.
    async fn mark_signed(
        &self,
        id: InvoiceId,
        record: SignatureRecord,
    ) -> Result<Invoice, StoreError>;

    /// Apply a status transition, rejecting backwards moves.
    async fn update_status(
        &self,
        id: InvoiceId,
        status: InvoiceStatus,
    ) -> Result<Invoice, StoreError>;

    async fn append_submission(&self, submission: InvoiceSubmission) -> Result<(), StoreError>;

    /// Submission attempts in insertion order.
    async fn submissions(&self, id: InvoiceId) -> Result<Vec<InvoiceSubmission>, StoreError>;

    async fn invoices_with_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>, StoreError>;

    async fn party(&self, id: &str) -> Result<Option<Party>, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    invoices: HashMap<InvoiceId, Invoice>,
    numbers: HashMap<String, InvoiceId>,
    items: HashMap<InvoiceId, Vec<InvoiceItem>>,
    submissions: HashMap<InvoiceId, Vec<InvoiceSubmission>>,
    parties: HashMap<String, Party>,
}

/// In-process store with unique invoice numbers and forward-only status.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    sequence: AtomicU64,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering after `last` (e.g. the highest number already issued).
    pub fn with_sequence_start(last: u64) -> Self {
        Self {
            sequence: AtomicU64::new(last),
            ..Self::default()
        }
    }

    pub async fn register_party(&self, party: Party) {
        self.tables
            .write()
            .await
            .parties
            .insert(party.id.clone(), party);
    }

    fn require(tables: &Tables, id: InvoiceId) -> Result<&Invoice, StoreError> {
        tables
            .invoices
            .get(&id)
            .ok_or(StoreError::InvoiceNotFound(id))
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn next_invoice_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_draft(&self, draft: DraftInvoice) -> Result<Invoice, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.numbers.contains_key(&draft.invoice_number) {
            return Err(StoreError::DuplicateInvoiceNumber(draft.invoice_number));
        }

        let id = InvoiceId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let items = draft
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| InvoiceItem {
                invoice_id: id,
                position: position as u32,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                tax_rate: item.tax_rate,
                tax_amount: item.tax_amount(),
                total_amount: item.total_amount(),
            })
            .collect();
        let invoice = Invoice {
            id,
            invoice_number: draft.invoice_number,
            aeat_id: draft.aeat_id,
            issuer_id: draft.issuer_id,
            recipient_id: draft.recipient_id,
            issue_date: draft.issue_date,
            due_date: draft.due_date,
            currency: draft.currency,
            total_amount: draft.total_amount,
            tax_amount: draft.tax_amount,
            qr_code: None,
            digital_signature: None,
            signature_date: None,
            status: InvoiceStatus::Draft,
            created_at: Utc::now(),
        };

        tables.numbers.insert(invoice.invoice_number.clone(), id);
        tables.items.insert(id, items);
        tables.invoices.insert(id, invoice.clone());
        Ok(invoice)
    }

    async fn invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.tables.read().await.invoices.get(&id).cloned())
    }

    async fn invoice_by_number(&self, number: &str) -> Result<Option<Invoice>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .numbers
            .get(number)
            .and_then(|id| tables.invoices.get(id))
            .cloned())
    }

    async fn items(&self, id: InvoiceId) -> Result<Vec<InvoiceItem>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .items
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_signed(
        &self,
        id: InvoiceId,
        record: SignatureRecord,
    ) -> Result<Invoice, StoreError> {
        let mut tables = self.tables.write().await;
        let current = Self::require(&tables, id)?.status;
        let next = current.transition(InvoiceStatus::Signed)?;
        let invoice = tables
            .invoices
            .get_mut(&id)
            .ok_or(StoreError::InvoiceNotFound(id))?;
        invoice.qr_code = Some(record.qr_code);
        invoice.digital_signature = Some(record.digital_signature);
        invoice.signature_date = Some(record.signature_date);
        invoice.status = next;
        Ok(invoice.clone())
    }

    async fn update_status(
        &self,
        id: InvoiceId,
        status: InvoiceStatus,
    ) -> Result<Invoice, StoreError> {
        let mut tables = self.tables.write().await;
        let invoice = tables
            .invoices
            .get_mut(&id)
            .ok_or(StoreError::InvoiceNotFound(id))?;
        invoice.status = invoice.status.transition(status)?;
        Ok(invoice.clone())
    }

    async fn append_submission(&self, submission: InvoiceSubmission) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        Self::require(&tables, submission.invoice_id)?;
        tables
            .submissions
            .entry(submission.invoice_id)
            .or_default()
            .push(submission);
        Ok(())
    }

    async fn submissions(&self, id: InvoiceId) -> Result<Vec<InvoiceSubmission>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .submissions
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn invoices_with_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>, StoreError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|invoice| invoice.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|invoice| invoice.id);
        Ok(matching)
    }

    async fn party(&self, id: &str) -> Result<Option<Party>, StoreError> {
        Ok(self.tables.read().await.parties.get(id).cloned())
    }
}
