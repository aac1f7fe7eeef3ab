mod common;

use common::{
    FlakyStore, ScriptedSubmitter, fast_retry, new_invoice, register_parties, service, settings,
    signer,
};
use factura_core::aeat::{AeatError, SubmissionReceipt};
use factura_core::config::RetryPolicy;
use factura_core::invoice::{
    InvoiceField, InvoiceId, InvoiceStatus, QrPayload, SubmissionStatus, ValidationKind,
    calculate_totals,
};
use factura_core::service::InvoiceService;
use factura_core::store::{DraftInvoice, InvoiceStore, MemoryStore, StoreError};
use factura_core::{Error, ErrorKind};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn rejected(message: &str) -> Result<SubmissionReceipt, AeatError> {
    Err(AeatError::Rejected {
        status: 400,
        code: Some("4102".into()),
        message: message.into(),
    })
}

fn unavailable() -> Result<SubmissionReceipt, AeatError> {
    Err(AeatError::ServerError {
        status: 503,
        body: "maintenance".into(),
    })
}

async fn store_draft<S: InvoiceStore>(store: &S, number: &str) -> InvoiceId {
    let request = new_invoice();
    let totals = calculate_totals(&request.items);
    store
        .insert_draft(DraftInvoice {
            invoice_number: number.into(),
            aeat_id: format!("aeat-{number}"),
            issuer_id: request.issuer_id,
            recipient_id: request.recipient_id,
            issue_date: request.issue_date,
            due_date: request.due_date,
            currency: request.currency,
            total_amount: totals.total_amount,
            tax_amount: totals.tax_amount,
            items: request.items,
        })
        .await
        .expect("draft stored")
        .id
}

#[tokio::test]
async fn accepted_invoice_ends_submitted() {
    let (service, submitter) = service(ScriptedSubmitter::accepting(), RetryPolicy::no_retry()).await;

    let details = service.create_invoice(new_invoice()).await.expect("created");
    let invoice = &details.invoice;

    assert_eq!(invoice.status, InvoiceStatus::Submitted);
    assert_eq!(invoice.invoice_number, "FAC-2026-000001");
    assert_eq!(invoice.total_amount, Decimal::new(3025, 1));
    assert_eq!(invoice.tax_amount, Decimal::new(525, 1));
    let totals = service.calculate_totals(&new_invoice().items);
    assert_eq!(totals.total_amount, invoice.total_amount);
    assert_eq!(service.calculate_totals(&[]).total_amount, Decimal::ZERO);
    assert!(invoice.qr_code.as_deref().unwrap().starts_with("data:image/png;base64,"));
    assert!(invoice.digital_signature.is_some());
    assert!(invoice.signature_date.is_some());
    assert_eq!(details.items.len(), 2);
    assert_eq!(details.issuer.as_ref().map(|p| p.tax_id.as_str()), Some("B12345678"));

    assert_eq!(details.submissions.len(), 1);
    assert_eq!(details.submissions[0].status, SubmissionStatus::Accepted);
    assert_eq!(details.submissions[0].retry_count, 0);
    assert_eq!(submitter.seen(), ["FAC-2026-000001"]);

    assert!(service.verify_invoice_signature(invoice.id).await.unwrap());
}

#[tokio::test]
async fn rejection_is_stored_not_raised() {
    let submitter = ScriptedSubmitter::with(vec![rejected("NIF no identificado")]);
    let (service, submitter) = service(submitter, fast_retry(3)).await;

    let details = service.create_invoice(new_invoice()).await.expect("created");

    assert_eq!(details.invoice.status, InvoiceStatus::SubmissionFailed);
    assert_eq!(details.submissions.len(), 1);
    let attempt = &details.submissions[0];
    assert_eq!(attempt.status, SubmissionStatus::Rejected);
    assert_eq!(attempt.response_code.as_deref(), Some("4102"));
    let message = attempt.response_message.as_deref().unwrap_or_default();
    assert!(message.contains("NIF no identificado"));
    // terminal, so no second attempt
    assert_eq!(submitter.seen().len(), 1);
}

#[tokio::test]
async fn retryable_failures_leave_one_row_per_attempt() {
    let submitter = ScriptedSubmitter::with(vec![unavailable(), unavailable()]);
    let (service, submitter) = service(submitter, fast_retry(3)).await;

    let details = service.create_invoice(new_invoice()).await.expect("created");

    assert_eq!(details.invoice.status, InvoiceStatus::Submitted);
    let counts: Vec<u32> = details.submissions.iter().map(|s| s.retry_count).collect();
    assert_eq!(counts, [0, 1, 2]);
    let statuses: Vec<_> = details.submissions.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        [
            SubmissionStatus::Rejected,
            SubmissionStatus::Rejected,
            SubmissionStatus::Accepted
        ]
    );
    assert_eq!(details.submissions[0].response_code.as_deref(), Some("503"));
    assert_eq!(submitter.seen().len(), 3);
}

#[tokio::test]
async fn exhausted_retries_can_be_resubmitted() {
    let submitter = ScriptedSubmitter::with(vec![
        Err(AeatError::Timeout(Duration::from_secs(30))),
        Err(AeatError::Network("connection reset".into())),
    ]);
    let (service, _submitter) = service(submitter, fast_retry(2)).await;

    let details = service.create_invoice(new_invoice()).await.expect("created");
    assert_eq!(details.invoice.status, InvoiceStatus::SubmissionFailed);
    assert_eq!(details.submissions.len(), 2);
    assert_eq!(details.submissions[0].response_code.as_deref(), Some("TIMEOUT"));

    let id = details.invoice.id;
    let invoice = service.resubmit(id).await.expect("resubmitted");
    assert_eq!(invoice.status, InvoiceStatus::Submitted);
    // signature kept from the first run
    assert_eq!(invoice.digital_signature, details.invoice.digital_signature);

    let submissions = service.store().submissions(id).await.unwrap();
    let counts: Vec<u32> = submissions.iter().map(|s| s.retry_count).collect();
    assert_eq!(counts, [0, 1, 2]);

    let err = service.resubmit(id).await.expect_err("already submitted");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn resume_finishes_stored_drafts() {
    let (service, submitter) = service(ScriptedSubmitter::accepting(), RetryPolicy::no_retry()).await;
    let first = store_draft(service.store().as_ref(), "FAC-2026-000101").await;
    let second = store_draft(service.store().as_ref(), "FAC-2026-000102").await;

    let invoice = service.resume(first).await.expect("resumed");
    assert_eq!(invoice.status, InvoiceStatus::Submitted);
    assert!(service.verify_invoice_signature(first).await.unwrap());

    // settled invoices are left alone
    let again = service.resume(first).await.expect("no-op");
    assert_eq!(again.status, InvoiceStatus::Submitted);
    assert_eq!(submitter.seen().len(), 1);

    let outcomes = service.resume_pending().await.expect("pending");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, second);
    assert_eq!(
        outcomes[0].1.as_ref().map(|i| i.status).ok(),
        Some(InvoiceStatus::Submitted)
    );
}

#[tokio::test]
async fn taken_number_is_replaced_once() {
    let store = register_parties(MemoryStore::with_sequence_start(5)).await;
    store_draft(store.as_ref(), "FAC-2026-000006").await;
    let service = InvoiceService::new(
        store.clone(),
        Arc::new(ScriptedSubmitter::accepting()),
        signer(),
        settings(RetryPolicy::no_retry()),
    );

    let details = service.create_invoice(new_invoice()).await.expect("created");
    assert_eq!(details.invoice.invoice_number, "FAC-2026-000007");
    assert_eq!(details.invoice.status, InvoiceStatus::Submitted);

    store_draft(store.as_ref(), "FAC-2026-000008").await;
    store_draft(store.as_ref(), "FAC-2026-000009").await;
    let err = service.create_invoice(new_invoice()).await.expect_err("second collision");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.invoice_id(), None);
    match &err {
        Error::Store(StoreError::DuplicateInvoiceNumber(number)) => {
            assert_eq!(number, "FAC-2026-000009");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn lost_signature_write_is_resumed_from_draft() {
    let store = Arc::new(FlakyStore::new().await);
    let submitter = Arc::new(ScriptedSubmitter::accepting());
    let service = InvoiceService::new(
        store.clone(),
        submitter.clone(),
        signer(),
        settings(RetryPolicy::no_retry()),
    );

    store.fail_next_mark_signed();
    let err = service.create_invoice(new_invoice()).await.expect_err("write lost");
    let Error::Incomplete {
        invoice_id, status, ..
    } = &err
    else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(*status, InvoiceStatus::Draft);
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(submitter.seen().is_empty());

    let invoice = service.resume(*invoice_id).await.expect("resumed");
    assert_eq!(invoice.status, InvoiceStatus::Submitted);
    assert_eq!(invoice.invoice_number, "FAC-2026-000001");
    assert!(service.verify_invoice_signature(invoice.id).await.unwrap());
}

#[tokio::test]
async fn signed_invoice_resumes_at_submission() {
    let store = Arc::new(FlakyStore::new().await);
    let submitter = Arc::new(ScriptedSubmitter::accepting());
    let service = InvoiceService::new(
        store.clone(),
        submitter.clone(),
        signer(),
        settings(RetryPolicy::no_retry()),
    );

    store.fail_next_submission_row();
    let err = service.create_invoice(new_invoice()).await.expect_err("row lost");
    let Error::Incomplete {
        invoice_id, status, ..
    } = &err
    else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(*status, InvoiceStatus::Signed);
    let id = *invoice_id;
    let signed = store.invoice(id).await.unwrap().expect("stored");
    assert!(signed.digital_signature.is_some());

    let invoice = service.resume(id).await.expect("resumed");
    assert_eq!(invoice.status, InvoiceStatus::Submitted);
    // signing is not repeated
    assert_eq!(invoice.digital_signature, signed.digital_signature);
    assert_eq!(invoice.signature_date, signed.signature_date);
    let submissions = store.submissions(id).await.unwrap();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].retry_count, 0);
    assert_eq!(submitter.seen().len(), 2);
}

#[tokio::test]
async fn cancel_only_before_submission() {
    let (service, submitter) = service(ScriptedSubmitter::accepting(), RetryPolicy::no_retry()).await;
    let draft = store_draft(service.store().as_ref(), "FAC-2026-000201").await;

    let cancelled = service.cancel(draft).await.expect("cancelled");
    assert_eq!(cancelled.status, InvoiceStatus::Cancelled);
    let resumed = service.resume(draft).await.expect("unchanged");
    assert_eq!(resumed.status, InvoiceStatus::Cancelled);
    assert!(submitter.seen().is_empty());

    let submitted = service.create_invoice(new_invoice()).await.unwrap().invoice;
    let err = service.cancel(submitted.id).await.expect_err("too late");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn validation_happens_before_persistence() {
    let (service, _submitter) = service(ScriptedSubmitter::accepting(), RetryPolicy::no_retry()).await;

    let mut request = new_invoice();
    request.items.clear();
    let err = service.create_invoice(request).await.expect_err("no items");
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut request = new_invoice();
    request.recipient_id = "nobody".into();
    let err = service.create_invoice(request).await.expect_err("unknown party");
    match &err {
        Error::Validation(validation) => {
            assert!(validation.has(InvoiceField::RecipientId, ValidationKind::UnknownReference));
        }
        other => panic!("unexpected error: {other}"),
    }

    // no sequence value was consumed by the failed requests
    let created = service.create_invoice(new_invoice()).await.unwrap();
    assert_eq!(created.invoice.invoice_number, "FAC-2026-000001");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creations_get_distinct_numbers() {
    let (service, _submitter) = service(ScriptedSubmitter::accepting(), RetryPolicy::no_retry()).await;
    let service = Arc::new(service);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.create_invoice(new_invoice()).await })
        })
        .collect();

    let mut numbers = HashSet::new();
    for handle in handles {
        let details = handle.await.expect("join").expect("created");
        assert!(numbers.insert(details.invoice.invoice_number));
    }
    assert_eq!(numbers.len(), 16);
}

#[tokio::test]
async fn verification_and_pdf_for_stored_invoice() {
    let (service, _submitter) = service(ScriptedSubmitter::accepting(), RetryPolicy::no_retry()).await;
    let invoice = service.create_invoice(new_invoice()).await.unwrap().invoice;

    let view = service.verification(&invoice.invoice_number).await.expect("view");
    assert_eq!(view.total_amount, invoice.total_amount);
    assert_eq!(view.verification_id, invoice.aeat_id);
    assert_eq!(view.status, InvoiceStatus::Submitted);

    let err = service.verification("FAC-1999-000001").await.expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let pdf = service.generate_pdf(invoice.id).await.expect("pdf");
    assert!(pdf.starts_with(b"%PDF"));

    let payload = QrPayload::from_invoice(&invoice, common::VERIFY_BASE);
    let decoded = QrPayload::decode(&payload.encode().unwrap()).unwrap();
    assert_eq!(decoded.invoice_number(), invoice.invoice_number);
    assert_eq!(
        decoded.verification_url(),
        format!("{}/verify/{}", common::VERIFY_BASE, invoice.invoice_number)
    );

    let err = service.get_invoice(InvoiceId(999)).await.expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
