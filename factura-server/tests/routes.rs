use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use factura_core::aeat::{AeatError, InvoiceSubmitter, SubmissionReceipt};
use factura_core::config::RetryPolicy;
use factura_core::invoice::Party;
use factura_core::invoice::sign::InvoiceSigner;
use factura_core::invoice::xml::AeatInvoice;
use factura_core::service::{InvoiceService, ServiceSettings};
use factura_core::store::MemoryStore;
use factura_server::{AppState, router};
use isocountry::CountryCode;
use k256::ecdsa::SigningKey;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct FixedSubmitter {
    reject: bool,
}

#[async_trait]
impl InvoiceSubmitter for FixedSubmitter {
    async fn submit(&self, _invoice: AeatInvoice<'_>) -> Result<SubmissionReceipt, AeatError> {
        if self.reject {
            Err(AeatError::Rejected {
                status: 422,
                code: Some("1100".into()),
                message: "Importe total incorrecto".into(),
            })
        } else {
            Ok(SubmissionReceipt::new("OK", None))
        }
    }
}

async fn app(reject: bool) -> Router {
    let store = Arc::new(MemoryStore::new());
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
    let signer = InvoiceSigner::from_signing_key(SigningKey::from_slice(&[7u8; 32]).unwrap());
    let service = InvoiceService::new(
        store,
        Arc::new(FixedSubmitter { reject }),
        signer,
        ServiceSettings {
            number_prefix: "FAC".into(),
            verification_base_url: "https://verify.test".into(),
            retry: RetryPolicy::no_retry(),
        },
    );
    router(AppState::new(service))
}

fn invoice_request() -> Value {
    json!({
        "issuerId": "school",
        "recipientId": "family-1",
        "issueDate": "2026-09-01",
        "dueDate": "2026-09-30",
        "items": [
            { "description": "Matricula", "quantity": 2, "unitPrice": 100, "taxRate": 21 },
            { "description": "Material", "quantity": 1, "unitPrice": 50, "taxRate": 21 }
        ]
    })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn decimal(value: &Value) -> Decimal {
    value.as_str().expect("decimal string").parse().unwrap()
}

#[tokio::test]
async fn create_then_fetch_invoice() {
    let app = app(false).await;

    let response = app
        .clone()
        .oneshot(post_json("/api/invoices", &invoice_request()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["status"], "submitted");
    assert_eq!(created["invoiceNumber"], "FAC-2026-000001");
    assert_eq!(decimal(&created["totalAmount"]), Decimal::new(3025, 1));
    assert_eq!(decimal(&created["taxAmount"]), Decimal::new(525, 1));
    let id = created["id"].as_u64().unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/invoices/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await;
    assert_eq!(fetched["items"].as_array().unwrap().len(), 2);
    assert_eq!(fetched["submissions"][0]["status"], "accepted");
    assert_eq!(fetched["recipient"]["taxId"], "12345678Z");

    let response = app
        .clone()
        .oneshot(get("/verify/FAC-2026-000001"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view = json_body(response).await;
    assert_eq!(view["verificationId"], created["aeatId"]);
    assert!(view.get("digitalSignature").is_none());

    let response = app
        .oneshot(get(&format!("/api/invoices/{id}/pdf")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn rejected_submission_still_creates() {
    let response = app(true)
        .await
        .oneshot(post_json("/api/invoices", &invoice_request()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "submission_failed");
    let message = body["submissions"][0]["responseMessage"].as_str().unwrap();
    assert!(message.contains("Importe total incorrecto"));
}

#[tokio::test]
async fn errors_map_to_status_and_kind() {
    let app = app(false).await;

    let mut request = invoice_request();
    request["items"] = json!([]);
    let response = app
        .clone()
        .oneshot(post_json("/api/invoices", &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["issues"][0]["field"], "items");

    let response = app.clone().oneshot(get("/api/invoices/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["kind"], "not_found");

    let response = app.clone().oneshot(get("/verify/FAC-1999-000009")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(post_json("/api/invoices/42/resume", &json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resume_of_submitted_invoice_is_a_no_op() {
    let app = app(false).await;
    let created = json_body(
        app.clone()
            .oneshot(post_json("/api/invoices", &invoice_request()))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_u64().unwrap();

    let response = app
        .oneshot(post_json(&format!("/api/invoices/{id}/resume"), &json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "submitted");
    assert_eq!(body["digitalSignature"], created["digitalSignature"]);
}

fn direct_debit_request(iban: &str, installments: Option<u32>) -> Value {
    json!({
        "creditor": {
            "name": "Colegio San Isidro S.L.",
            "iban": "ES9121000418450200051332",
            "bic": "CAIXESBBXXX",
            "creditorId": "ES12ZZZB12345678"
        },
        "bankAccount": {
            "iban": iban,
            "bic": "COBADEFFXXX",
            "accountHolder": "Ana Ruiz",
            "mandateReference": "MND-0001",
            "mandateDate": "2026-06-01"
        },
        "payment": {
            "description": "Matricula 2026/27",
            "amount": "100.00",
            "dueDate": "2026-10-05"
        },
        "installments": installments
    })
}

#[tokio::test]
async fn direct_debit_is_an_xml_attachment() {
    let response = app(false)
        .await
        .oneshot(post_json(
            "/api/sepa/direct-debits",
            &direct_debit_request("DE89370400440532013000", None),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"sepa-direct-debit-MND-0001.xml\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let xml = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(xml.contains("<SeqTp>OOFF</SeqTp>"));
    assert!(xml.contains(r#"<InstdAmt Ccy="EUR">100.00</InstdAmt>"#));
}

#[tokio::test]
async fn installment_plan_and_bad_iban() {
    let app = app(false).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/sepa/direct-debits",
            &direct_debit_request("DE89370400440532013000", Some(3)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 3);
    assert_eq!(files[0]["sequenceType"], "FRST");
    assert_eq!(files[2]["fileName"], "sepa-direct-debit-MND-0001-3of3.xml");
    assert_eq!(decimal(&files[2]["amount"]), Decimal::new(3334, 2));

    let response = app
        .oneshot(post_json(
            "/api/sepa/direct-debits",
            &direct_debit_request("12345", None),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["issues"][0]["field"], "iban");
}
