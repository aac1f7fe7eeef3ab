//! HTTP surface for the invoice pipeline.
//!
//! Routes:
//! - `POST /api/invoices`
//! - `GET /api/invoices/{id}` and `GET /api/invoices/{id}/pdf`
//! - `POST /api/invoices/{id}/resume`
//! - `GET /verify/{invoiceNumber}`
//! - `POST /api/sepa/direct-debits`
use axum::Router;
use axum::routing::{get, post};
use factura_core::aeat::InvoiceSubmitter;
use factura_core::service::InvoiceService;
use factura_core::store::InvoiceStore;
use std::sync::Arc;

pub mod error;
mod routes;

pub use error::ApiError;

/// Shared handler state.
pub struct AppState<S, T> {
    pub service: Arc<InvoiceService<S, T>>,
}

impl<S, T> AppState<S, T> {
    pub fn new(service: InvoiceService<S, T>) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

impl<S, T> Clone for AppState<S, T> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

pub fn router<S, T>(state: AppState<S, T>) -> Router
where
    S: InvoiceStore + 'static,
    T: InvoiceSubmitter + 'static,
{
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/invoices", post(routes::create_invoice::<S, T>))
        .route("/api/invoices/{id}", get(routes::get_invoice::<S, T>))
        .route("/api/invoices/{id}/pdf", get(routes::invoice_pdf::<S, T>))
        .route(
            "/api/invoices/{id}/resume",
            post(routes::resume_invoice::<S, T>),
        )
        .route("/verify/{invoice_number}", get(routes::verify_invoice::<S, T>))
        .route("/api/sepa/direct-debits", post(routes::direct_debits))
        .with_state(state)
}
