//! Shared rows for unit tests.
use super::{Invoice, InvoiceId, InvoiceItem, InvoiceStatus, NewInvoice, NewInvoiceItem, Party};
use chrono::{NaiveDate, TimeZone, Utc};
use iso_currency::Currency;
use isocountry::CountryCode;
use rust_decimal::Decimal;

pub(crate) fn issuer() -> Party {
    Party::new("school", "Colegio San Isidro S.L.", "B12345678", CountryCode::ESP)
}

pub(crate) fn recipient() -> Party {
    Party::new("family-1", "Ana Ruiz", "12345678Z", CountryCode::ESP)
}

pub(crate) fn new_invoice() -> NewInvoice {
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

pub(crate) fn invoice() -> Invoice {
    Invoice {
        id: InvoiceId(1),
        invoice_number: "FAC-2026-000001".into(),
        aeat_id: "0d6c6a3e-58c4-4d43-9b7e-4d5a4f3f1a11".into(),
        issuer_id: "school".into(),
        recipient_id: "family-1".into(),
        issue_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        due_date: NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
        currency: Currency::EUR,
        total_amount: Decimal::new(3025, 1),
        tax_amount: Decimal::new(525, 1),
        qr_code: None,
        digital_signature: Some("MEUCIQ==".into()),
        signature_date: Some(Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap()),
        status: InvoiceStatus::Signed,
        created_at: Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap(),
    }
}

pub(crate) fn items() -> Vec<InvoiceItem> {
    new_invoice()
        .items
        .iter()
        .enumerate()
        .map(|(position, item)| InvoiceItem {
            invoice_id: InvoiceId(1),
            position: position as u32,
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate: item.tax_rate,
            tax_amount: item.tax_amount(),
            total_amount: item.total_amount(),
        })
        .collect()
}
