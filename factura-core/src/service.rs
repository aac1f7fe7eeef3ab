//! Invoice pipeline: numbering, persistence, signing, QR and submission.
use chrono::{NaiveDate, Utc};
use iso_currency::Currency;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    Error, Result,
    aeat::{AeatError, InvoiceSubmitter, SubmissionReceipt},
    config::{Config, RetryPolicy},
    invoice::{
        Invoice, InvoiceField, InvoiceId, InvoiceItem, InvoiceStatus, InvoiceSubmission,
        InvoiceTotals, NewInvoice, NewInvoiceItem, Party, QrCodeGenerator, QrPayload,
        SubmissionStatus, TransitionError, ValidationError, ValidationIssue, ValidationKind,
        calculate_totals,
        canonical::SigningPayload,
        number::format_invoice_number,
        pdf::InvoicePdf,
        sign::{InvoiceSigner, verify_with_key},
        xml::AeatInvoice,
    },
    store::{DraftInvoice, InvoiceStore, SignatureRecord, StoreError},
};

/// Settings the pipeline reads from [`Config`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub number_prefix: String,
    pub verification_base_url: String,
    pub retry: RetryPolicy,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            number_prefix: config.number_prefix().to_string(),
            verification_base_url: config.verification_base_url().to_string(),
            retry: config.retry_policy(),
        }
    }
}

/// Invoice with its owned rows and parties.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetails {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub submissions: Vec<InvoiceSubmission>,
    pub issuer: Option<Party>,
    pub recipient: Option<Party>,
}

/// Public projection served at `/verify/{invoiceNumber}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationView {
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub total_amount: Decimal,
    pub currency: Currency,
    pub status: InvoiceStatus,
    pub verification_id: String,
}

/// Drives invoices through `draft -> signed -> submitted | submission_failed`.
///
/// Every step after persistence is resumable: a failure is reported as
/// [`Error::Incomplete`] carrying the invoice id, and [`InvoiceService::resume`]
/// continues from the stored status.
pub struct InvoiceService<S, T> {
    store: Arc<S>,
    submitter: Arc<T>,
    signer: InvoiceSigner,
    qr: QrCodeGenerator,
    settings: ServiceSettings,
}

impl<S, T> InvoiceService<S, T>
where
    S: InvoiceStore,
    T: InvoiceSubmitter,
{
    pub fn new(
        store: Arc<S>,
        submitter: Arc<T>,
        signer: InvoiceSigner,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            submitter,
            signer,
            qr: QrCodeGenerator::default(),
            settings,
        }
    }

    /// Build the service from configuration, loading the private key.
    ///
    /// # Errors
    /// Returns [`Error::Signing`] when `PRIVATE_KEY` cannot be parsed.
    pub fn from_config(config: &Config, store: Arc<S>, submitter: Arc<T>) -> Result<Self> {
        let signer = InvoiceSigner::from_pem(config.private_key_pem())?;
        Ok(Self::new(
            store,
            submitter,
            signer,
            ServiceSettings::from_config(config),
        ))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn signer(&self) -> &InvoiceSigner {
        &self.signer
    }

    /// Reserve the next sequence value and format the business number.
    pub async fn generate_invoice_number(&self, issue_date: NaiveDate) -> Result<String> {
        let sequence = self.store.next_invoice_sequence().await?;
        Ok(format_invoice_number(
            &self.settings.number_prefix,
            issue_date,
            sequence,
        ))
    }

    pub fn calculate_totals(&self, items: &[NewInvoiceItem]) -> InvoiceTotals {
        calculate_totals(items)
    }

    /// Create, sign and submit a new invoice.
    ///
    /// Authority failures do not fail the call: the invoice ends in
    /// `submission_failed` with the attempts recorded.
    ///
    /// # Errors
    /// Validation problems are returned before anything is stored. Failures
    /// after the draft exists are wrapped in [`Error::Incomplete`].
    pub async fn create_invoice(&self, request: NewInvoice) -> Result<InvoiceDetails> {
        request.validate()?;
        let (issuer, recipient) = self.request_parties(&request).await?;
        let totals = self.calculate_totals(&request.items);
        let aeat_id = Uuid::new_v4().to_string();

        let invoice = self.insert_with_fresh_number(&request, totals, &aeat_id).await?;
        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total_amount,
            "invoice draft stored"
        );

        let invoice_id = invoice.id;
        let invoice = match self.advance(invoice, &issuer, &recipient).await {
            Ok(invoice) => invoice,
            Err(err) => return Err(self.incomplete(invoice_id, err).await),
        };
        self.details(invoice).await
    }

    /// Continue the pipeline for a stored invoice. Settled invoices are
    /// returned unchanged.
    pub async fn resume(&self, id: InvoiceId) -> Result<Invoice> {
        let invoice = self.load(id).await?;
        if invoice.status.is_settled() {
            debug!(invoice_id = %id, status = %invoice.status, "nothing to resume");
            return Ok(invoice);
        }
        info!(invoice_id = %id, status = %invoice.status, "resuming invoice");
        let (issuer, recipient) = self.invoice_parties(&invoice).await?;
        match self.advance(invoice, &issuer, &recipient).await {
            Ok(invoice) => Ok(invoice),
            Err(err) => Err(self.incomplete(id, err).await),
        }
    }

    /// Resume every invoice left in `draft` or `signed`.
    pub async fn resume_pending(&self) -> Result<Vec<(InvoiceId, Result<Invoice>)>> {
        let mut pending = self.store.invoices_with_status(InvoiceStatus::Draft).await?;
        pending.extend(self.store.invoices_with_status(InvoiceStatus::Signed).await?);
        pending.sort_by_key(|invoice| invoice.id);

        let mut outcomes = Vec::with_capacity(pending.len());
        for invoice in pending {
            let outcome = self.resume(invoice.id).await;
            if let Err(err) = &outcome {
                warn!(invoice_id = %invoice.id, error = %err, "resume failed");
            }
            outcomes.push((invoice.id, outcome));
        }
        Ok(outcomes)
    }

    /// Submit a `submission_failed` invoice again, keeping its signature.
    pub async fn resubmit(&self, id: InvoiceId) -> Result<Invoice> {
        let invoice = self.load(id).await?;
        if invoice.status != InvoiceStatus::SubmissionFailed {
            return Err(StoreError::InvalidTransition(TransitionError {
                from: invoice.status,
                to: InvoiceStatus::Submitted,
            })
            .into());
        }
        let (issuer, recipient) = self.invoice_parties(&invoice).await?;
        info!(invoice_id = %id, "resubmitting invoice");
        self.submit(invoice, &issuer, &recipient).await
    }

    /// Cancel an invoice that has not been submitted.
    pub async fn cancel(&self, id: InvoiceId) -> Result<Invoice> {
        let invoice = self.store.update_status(id, InvoiceStatus::Cancelled).await?;
        info!(invoice_id = %id, "invoice cancelled");
        Ok(invoice)
    }

    pub async fn get_invoice(&self, id: InvoiceId) -> Result<InvoiceDetails> {
        let invoice = self.load(id).await?;
        self.details(invoice).await
    }

    pub async fn verification(&self, invoice_number: &str) -> Result<VerificationView> {
        let invoice = self
            .store
            .invoice_by_number(invoice_number)
            .await?
            .ok_or_else(|| Error::not_found("invoice", invoice_number))?;
        Ok(VerificationView {
            invoice_number: invoice.invoice_number,
            issue_date: invoice.issue_date,
            total_amount: invoice.total_amount,
            currency: invoice.currency,
            status: invoice.status,
            verification_id: invoice.aeat_id,
        })
    }

    /// Render the invoice, its items and QR code as PDF bytes.
    pub async fn generate_pdf(&self, id: InvoiceId) -> Result<Vec<u8>> {
        let invoice = self.load(id).await?;
        let items = self.store.items(id).await?;
        let issuer = self.store.party(&invoice.issuer_id).await?;
        let recipient = self.store.party(&invoice.recipient_id).await?;
        let qr = match invoice.qr_code {
            Some(_) => Some(self.qr.modules(&QrPayload::from_invoice(
                &invoice,
                &self.settings.verification_base_url,
            ))?),
            None => None,
        };

        let bytes = InvoicePdf {
            invoice: &invoice,
            items: &items,
            issuer: issuer.as_ref(),
            recipient: recipient.as_ref(),
            qr: qr.as_ref(),
        }
        .render()?;
        debug!(invoice_id = %id, bytes = bytes.len(), "rendered invoice PDF");
        Ok(bytes)
    }

    /// Recompute the canonical payload from storage and check the signature.
    pub async fn verify_invoice_signature(&self, id: InvoiceId) -> Result<bool> {
        let invoice = self.load(id).await?;
        let Some(signature) = invoice.digital_signature.as_deref() else {
            return Ok(false);
        };
        let items = self.store.items(id).await?;
        let payload = SigningPayload::from_rows(&invoice, &items);
        Ok(verify_with_key(
            &payload.to_bytes(),
            signature,
            self.signer.verifying_key(),
        ))
    }

    async fn load(&self, id: InvoiceId) -> Result<Invoice> {
        self.store
            .invoice(id)
            .await?
            .ok_or_else(|| Error::not_found("invoice", id))
    }

    async fn details(&self, invoice: Invoice) -> Result<InvoiceDetails> {
        let id = invoice.id;
        Ok(InvoiceDetails {
            items: self.store.items(id).await?,
            submissions: self.store.submissions(id).await?,
            issuer: self.store.party(&invoice.issuer_id).await?,
            recipient: self.store.party(&invoice.recipient_id).await?,
            invoice,
        })
    }

    async fn request_parties(&self, request: &NewInvoice) -> Result<(Party, Party)> {
        let issuer = self.store.party(&request.issuer_id).await?;
        let recipient = self.store.party(&request.recipient_id).await?;
        match (issuer, recipient) {
            (Some(issuer), Some(recipient)) => Ok((issuer, recipient)),
            (issuer, recipient) => {
                let mut issues = Vec::new();
                if issuer.is_none() {
                    issues.push(ValidationIssue {
                        field: InvoiceField::IssuerId,
                        kind: ValidationKind::UnknownReference,
                        item_index: None,
                    });
                }
                if recipient.is_none() {
                    issues.push(ValidationIssue {
                        field: InvoiceField::RecipientId,
                        kind: ValidationKind::UnknownReference,
                        item_index: None,
                    });
                }
                Err(ValidationError::new(issues).into())
            }
        }
    }

    async fn invoice_parties(&self, invoice: &Invoice) -> Result<(Party, Party)> {
        let issuer = self
            .store
            .party(&invoice.issuer_id)
            .await?
            .ok_or_else(|| Error::not_found("party", &invoice.issuer_id))?;
        let recipient = self
            .store
            .party(&invoice.recipient_id)
            .await?
            .ok_or_else(|| Error::not_found("party", &invoice.recipient_id))?;
        Ok((issuer, recipient))
    }

    /// Insert the draft, retrying once with a new number on collision.
    async fn insert_with_fresh_number(
        &self,
        request: &NewInvoice,
        totals: InvoiceTotals,
        aeat_id: &str,
    ) -> Result<Invoice> {
        let mut collided = false;
        loop {
            let invoice_number = self.generate_invoice_number(request.issue_date).await?;
            let draft = DraftInvoice {
                invoice_number,
                aeat_id: aeat_id.to_string(),
                issuer_id: request.issuer_id.clone(),
                recipient_id: request.recipient_id.clone(),
                issue_date: request.issue_date,
                due_date: request.due_date,
                currency: request.currency,
                total_amount: totals.total_amount,
                tax_amount: totals.tax_amount,
                items: request.items.clone(),
            };
            match self.store.insert_draft(draft).await {
                Ok(invoice) => return Ok(invoice),
                Err(StoreError::DuplicateInvoiceNumber(number)) if !collided => {
                    warn!(invoice_number = %number, "invoice number taken, generating another");
                    collided = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn advance(&self, mut invoice: Invoice, issuer: &Party, recipient: &Party) -> Result<Invoice> {
        if invoice.status == InvoiceStatus::Draft {
            invoice = self.sign(invoice).await?;
        }
        if invoice.status == InvoiceStatus::Signed {
            invoice = self.submit(invoice, issuer, recipient).await?;
        }
        Ok(invoice)
    }

    async fn sign(&self, invoice: Invoice) -> Result<Invoice> {
        let payload = QrPayload::from_invoice(&invoice, &self.settings.verification_base_url);
        let qr_code = self.qr.generate(&payload)?;

        // Sign what storage holds, not the in-memory request.
        let stored = self.load(invoice.id).await?;
        let items = self.store.items(invoice.id).await?;
        let signature = self
            .signer
            .sign_invoice(&SigningPayload::from_rows(&stored, &items))?;
        let (digital_signature, signature_date) = signature.into_parts();

        let signed = self
            .store
            .mark_signed(
                invoice.id,
                SignatureRecord {
                    qr_code,
                    digital_signature,
                    signature_date,
                },
            )
            .await?;
        info!(invoice_id = %signed.id, "invoice signed");
        Ok(signed)
    }

    async fn submit(&self, invoice: Invoice, issuer: &Party, recipient: &Party) -> Result<Invoice> {
        let items = self.store.items(invoice.id).await?;
        let previous_attempts = self.store.submissions(invoice.id).await?.len() as u32;
        let policy = self.settings.retry;
        let mut attempt = 0;

        loop {
            let retry_count = previous_attempts + attempt;
            let outcome = self
                .submitter
                .submit(AeatInvoice {
                    invoice: &invoice,
                    items: &items,
                    issuer,
                    recipient,
                })
                .await;

            match outcome {
                Ok(receipt) => {
                    self.record_attempt(&invoice, retry_count, Ok(&receipt)).await?;
                    let submitted = self
                        .store
                        .update_status(invoice.id, InvoiceStatus::Submitted)
                        .await?;
                    info!(
                        invoice_id = %invoice.id,
                        code = receipt.code(),
                        duplicate = receipt.is_duplicate(),
                        "invoice submitted"
                    );
                    return Ok(submitted);
                }
                Err(err) => {
                    self.record_attempt(&invoice, retry_count, Err(&err)).await?;
                    attempt += 1;
                    if err.is_retryable() && attempt < policy.max_attempts() {
                        let delay = policy.delay_for(attempt - 1);
                        warn!(
                            invoice_id = %invoice.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "submission failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    warn!(invoice_id = %invoice.id, error = %err, "submission failed");
                    return Ok(self
                        .store
                        .update_status(invoice.id, InvoiceStatus::SubmissionFailed)
                        .await?);
                }
            }
        }
    }

    async fn record_attempt(
        &self,
        invoice: &Invoice,
        retry_count: u32,
        outcome: std::result::Result<&SubmissionReceipt, &AeatError>,
    ) -> Result<()> {
        let (status, response_code, response_message) = match outcome {
            Ok(receipt) => (
                SubmissionStatus::Accepted,
                Some(receipt.code().to_string()),
                receipt.message().map(str::to_string),
            ),
            Err(err) => (
                SubmissionStatus::Rejected,
                Some(err.response_code()),
                Some(err.to_string()),
            ),
        };
        self.store
            .append_submission(InvoiceSubmission {
                invoice_id: invoice.id,
                status,
                response_code,
                response_message,
                retry_count,
                submitted_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    async fn incomplete(&self, invoice_id: InvoiceId, err: Error) -> Error {
        let status = match self.store.invoice(invoice_id).await {
            Ok(Some(invoice)) => invoice.status,
            _ => InvoiceStatus::Draft,
        };
        warn!(invoice_id = %invoice_id, status = %status, error = %err, "invoice pipeline stopped");
        Error::Incomplete {
            invoice_id,
            status,
            source: Box::new(err),
        }
    }
}
