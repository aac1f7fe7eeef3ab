//! Canonical bytes covered by the invoice signature.
use super::{Invoice, InvoiceItem};
use rust_decimal::Decimal;
use serde::Serialize;

/// Fixed-field view of a persisted invoice.
///
/// Field order is the serialization order, so the JSON produced by
/// [`SigningPayload::to_bytes`] is stable for the same rows. Amounts are
/// rendered as plain decimal strings normalized to two places.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningPayload {
    invoice_number: String,
    aeat_id: String,
    issuer_id: String,
    recipient_id: String,
    issue_date: String,
    due_date: String,
    currency: String,
    total_amount: String,
    tax_amount: String,
    items: Vec<SigningItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct SigningItem {
    description: String,
    quantity: String,
    unit_price: String,
    tax_rate: String,
    total_amount: String,
}

impl SigningPayload {
    /// Build the payload from stored rows. Items are ordered by position.
    pub fn from_rows(invoice: &Invoice, items: &[InvoiceItem]) -> Self {
        let mut ordered: Vec<&InvoiceItem> = items.iter().collect();
        ordered.sort_by_key(|item| item.position);

        Self {
            invoice_number: invoice.invoice_number.clone(),
            aeat_id: invoice.aeat_id.clone(),
            issuer_id: invoice.issuer_id.clone(),
            recipient_id: invoice.recipient_id.clone(),
            issue_date: invoice.issue_date.format("%Y-%m-%d").to_string(),
            due_date: invoice.due_date.format("%Y-%m-%d").to_string(),
            currency: invoice.currency.code().to_string(),
            total_amount: amount(invoice.total_amount),
            tax_amount: amount(invoice.tax_amount),
            items: ordered
                .into_iter()
                .map(|item| SigningItem {
                    description: item.description.clone(),
                    quantity: plain(item.quantity),
                    unit_price: amount(item.unit_price),
                    tax_rate: plain(item.tax_rate),
                    total_amount: amount(item.total_amount),
                })
                .collect(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // A struct of strings cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Format a money amount with exactly two decimal places.
pub fn amount(value: Decimal) -> String {
    let mut value = super::round_money(value);
    value.rescale(2);
    value.to_string()
}

fn plain(value: Decimal) -> String {
    value.normalize().to_string()
}
