use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use factura_core::invoice::ValidationIssue;
use factura_core::sepa::SepaError;
use factura_core::{Error, ErrorKind};
use serde::Serialize;

/// Core error rendered as `{error, kind, invoiceId?}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    invoice_id: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<ValidationIssue>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<SepaError> for ApiError {
    fn from(err: SepaError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, %status, "request failed");
        } else {
            tracing::debug!(error = %self.0, %status, "request rejected");
        }
        let issues = validation_issues(&self.0);
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind().as_str(),
            invoice_id: self.0.invoice_id().map(|id| id.0),
            issues,
        };
        (status, Json(body)).into_response()
    }
}

fn validation_issues(err: &Error) -> Vec<ValidationIssue> {
    match err {
        Error::Validation(validation) => validation.issues.clone(),
        Error::Sepa(SepaError::Validation(validation)) => validation.issues.clone(),
        Error::Incomplete { source, .. } => validation_issues(source),
        _ => Vec::new(),
    }
}
