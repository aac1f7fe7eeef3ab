use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{NaiveDate, Utc};
use factura_core::aeat::InvoiceSubmitter;
use factura_core::invoice::{Invoice, InvoiceId, NewInvoice};
use factura_core::sepa::{DirectDebitRequest, SepaFile, SequenceType};
use factura_core::service::{InvoiceDetails, VerificationView};
use factura_core::store::InvoiceStore;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

pub(crate) async fn create_invoice<S, T>(
    State(state): State<AppState<S, T>>,
    Json(request): Json<NewInvoice>,
) -> Result<(StatusCode, Json<InvoiceDetails>), ApiError>
where
    S: InvoiceStore + 'static,
    T: InvoiceSubmitter + 'static,
{
    let details = state.service.create_invoice(request).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

pub(crate) async fn get_invoice<S, T>(
    State(state): State<AppState<S, T>>,
    Path(id): Path<u64>,
) -> Result<Json<InvoiceDetails>, ApiError>
where
    S: InvoiceStore + 'static,
    T: InvoiceSubmitter + 'static,
{
    Ok(Json(state.service.get_invoice(InvoiceId(id)).await?))
}

pub(crate) async fn invoice_pdf<S, T>(
    State(state): State<AppState<S, T>>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError>
where
    S: InvoiceStore + 'static,
    T: InvoiceSubmitter + 'static,
{
    let bytes = state.service.generate_pdf(InvoiceId(id)).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"invoice-{id}.pdf\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub(crate) async fn resume_invoice<S, T>(
    State(state): State<AppState<S, T>>,
    Path(id): Path<u64>,
) -> Result<Json<Invoice>, ApiError>
where
    S: InvoiceStore + 'static,
    T: InvoiceSubmitter + 'static,
{
    Ok(Json(state.service.resume(InvoiceId(id)).await?))
}

pub(crate) async fn verify_invoice<S, T>(
    State(state): State<AppState<S, T>>,
    Path(invoice_number): Path<String>,
) -> Result<Json<VerificationView>, ApiError>
where
    S: InvoiceStore + 'static,
    T: InvoiceSubmitter + 'static,
{
    Ok(Json(state.service.verification(&invoice_number).await?))
}

pub(crate) async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SepaFileView {
    file_name: String,
    amount: Decimal,
    due_date: NaiveDate,
    sequence_type: SequenceType,
    xml: String,
}

impl From<SepaFile> for SepaFileView {
    fn from(file: SepaFile) -> Self {
        Self {
            file_name: file.file_name,
            amount: file.amount,
            due_date: file.due_date,
            sequence_type: file.sequence,
            xml: file.xml,
        }
    }
}

/// One collection comes back as a pain.008 attachment, an installment plan
/// as a JSON list of files.
pub(crate) async fn direct_debits(
    Json(request): Json<DirectDebitRequest>,
) -> Result<Response, ApiError> {
    let plan = request.is_plan();
    let mut files = request.generate(Utc::now().naive_utc())?;
    if !plan && files.len() == 1 {
        let file = files.remove(0);
        return Ok((
            [
                (header::CONTENT_TYPE, "application/xml".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file.file_name),
                ),
            ],
            file.xml,
        )
            .into_response());
    }
    let files: Vec<SepaFileView> = files.into_iter().map(SepaFileView::from).collect();
    Ok(Json(serde_json::json!({ "files": files })).into_response())
}
