use async_trait::async_trait;
use chrono::NaiveDate;
use factura_core::aeat::{AeatError, InvoiceSubmitter, SubmissionReceipt};
use factura_core::config::RetryPolicy;
use factura_core::invoice::sign::InvoiceSigner;
use factura_core::invoice::xml::AeatInvoice;
use factura_core::invoice::{
    Invoice, InvoiceId, InvoiceItem, InvoiceStatus, InvoiceSubmission, NewInvoice, NewInvoiceItem,
    Party,
};
use factura_core::service::{InvoiceService, ServiceSettings};
use factura_core::store::{DraftInvoice, InvoiceStore, MemoryStore, SignatureRecord, StoreError};
use iso_currency::Currency;
use isocountry::CountryCode;
use k256::ecdsa::SigningKey;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const VERIFY_BASE: &str = "https://verify.test";

#[allow(dead_code)]
pub fn signing_key() -> SigningKey {
    SigningKey::from_slice(&[7u8; 32]).expect("test key")
}

#[allow(dead_code)]
pub fn signer() -> InvoiceSigner {
    InvoiceSigner::from_signing_key(signing_key())
}

#[allow(dead_code)]
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
}

#[allow(dead_code)]
pub fn settings(retry: RetryPolicy) -> ServiceSettings {
    ServiceSettings {
        number_prefix: "FAC".into(),
        verification_base_url: VERIFY_BASE.into(),
        retry,
    }
}

#[allow(dead_code)]
pub async fn store_with_parties() -> Arc<MemoryStore> {
    register_parties(MemoryStore::new()).await
}

#[allow(dead_code)]
pub async fn register_parties(store: MemoryStore) -> Arc<MemoryStore> {
    let store = Arc::new(store);
    store
        .register_party(Party::new(
            "school",
            "Colegio San Isidro S.L.",
            "B12345678",
            CountryCode::ESP,
        ))
        .await;
    store
        .register_party(Party::new("family-1", "Ana Ruiz", "12345678Z", CountryCode::ESP))
        .await;
    store
}

#[allow(dead_code)]
pub fn new_invoice() -> NewInvoice {
    NewInvoice {
        issuer_id: "school".into(),
        recipient_id: "family-1".into(),
        issue_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        due_date: NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
        currency: Currency::EUR,
        items: vec![
            NewInvoiceItem::new("Matricula", Decimal::from(2), Decimal::from(100), Decimal::from(21)),
            NewInvoiceItem::new("Material", Decimal::ONE, Decimal::from(50), Decimal::from(21)),
        ],
    }
}

/// Replays queued outcomes, then accepts everything.
#[derive(Default)]
pub struct ScriptedSubmitter {
    outcomes: Mutex<VecDeque<Result<SubmissionReceipt, AeatError>>>,
    seen: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedSubmitter {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn with(outcomes: Vec<Result<SubmissionReceipt, AeatError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, outcome: Result<SubmissionReceipt, AeatError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Invoice numbers in submission order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl InvoiceSubmitter for ScriptedSubmitter {
    async fn submit(&self, invoice: AeatInvoice<'_>) -> Result<SubmissionReceipt, AeatError> {
        self.seen
            .lock()
            .unwrap()
            .push(invoice.invoice.invoice_number.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SubmissionReceipt::new("OK", Some("accepted".into()))))
    }
}

#[allow(dead_code)]
pub async fn service(
    submitter: ScriptedSubmitter,
    retry: RetryPolicy,
) -> (
    InvoiceService<MemoryStore, ScriptedSubmitter>,
    Arc<ScriptedSubmitter>,
) {
    let submitter = Arc::new(submitter);
    let service = InvoiceService::new(
        store_with_parties().await,
        submitter.clone(),
        signer(),
        settings(retry),
    );
    (service, submitter)
}

/// Memory store whose writes can be made to fail once.
#[derive(Default)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_mark_signed: AtomicBool,
    fail_append: AtomicBool,
}

#[allow(dead_code)]
impl FlakyStore {
    pub async fn new() -> Self {
        Self {
            inner: store_with_parties().await,
            ..Self::default()
        }
    }

    pub fn fail_next_mark_signed(&self) {
        self.fail_mark_signed.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_submission_row(&self) {
        self.fail_append.store(true, Ordering::SeqCst);
    }

    fn trip(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.swap(false, Ordering::SeqCst) {
            Err(StoreError::Backend("connection lost".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl InvoiceStore for FlakyStore {
    async fn next_invoice_sequence(&self) -> Result<u64, StoreError> {
        self.inner.next_invoice_sequence().await
    }

    async fn insert_draft(&self, draft: DraftInvoice) -> Result<Invoice, StoreError> {
        self.inner.insert_draft(draft).await
    }

    async fn invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        self.inner.invoice(id).await
    }

    async fn invoice_by_number(&self, number: &str) -> Result<Option<Invoice>, StoreError> {
        self.inner.invoice_by_number(number).await
    }

    async fn items(&self, id: InvoiceId) -> Result<Vec<InvoiceItem>, StoreError> {
        self.inner.items(id).await
    }

    async fn mark_signed(
        &self,
        id: InvoiceId,
        record: SignatureRecord,
    ) -> Result<Invoice, StoreError> {
        Self::trip(&self.fail_mark_signed)?;
        self.inner.mark_signed(id, record).await
    }

    async fn update_status(
        &self,
        id: InvoiceId,
        status: InvoiceStatus,
    ) -> Result<Invoice, StoreError> {
        self.inner.update_status(id, status).await
    }

    async fn append_submission(&self, submission: InvoiceSubmission) -> Result<(), StoreError> {
        Self::trip(&self.fail_append)?;
        self.inner.append_submission(submission).await
    }

    async fn submissions(&self, id: InvoiceId) -> Result<Vec<InvoiceSubmission>, StoreError> {
        self.inner.submissions(id).await
    }

    async fn invoices_with_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>, StoreError> {
        self.inner.invoices_with_status(status).await
    }

    async fn party(&self, id: &str) -> Result<Option<Party>, StoreError> {
        self.inner.party(id).await
    }
}
