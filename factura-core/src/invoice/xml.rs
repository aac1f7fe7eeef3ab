//! FactuRAE-style XML for authority submission.
use super::canonical::amount;
use super::{Invoice, InvoiceItem, Party};

use quick_xml::DeError;
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;

pub const FACTURAE_NS: &str = "http://www.facturae.gob.es/formato/Versiones/Facturaev3_2_2.xml";
pub const SCHEMA_VERSION: &str = "3.2.2";

/// Everything needed to render one invoice document.
#[derive(Debug, Clone, Copy)]
pub struct AeatInvoice<'a> {
    pub invoice: &'a Invoice,
    pub items: &'a [InvoiceItem],
    pub issuer: &'a Party,
    pub recipient: &'a Party,
}

/// XML serialization error.
#[derive(Debug, Error)]
pub enum InvoiceXmlError {
    #[error("failed to serialize invoice to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
    #[error("failed to parse authority response: {source}")]
    Response {
        #[from]
        source: DeError,
    },
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

/// Serialize invoices to XML.
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError>;

    fn to_xml(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

impl ToXml for AeatInvoice<'_> {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError> {
        let mut buffer = String::with_capacity(4096);
        buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        buffer.push('\n');

        {
            let mut serializer = QuickXmlSerializer::new(&mut buffer);
            if let XmlFormat::Pretty {
                indent_char,
                indent_size,
            } = format
            {
                serializer.indent(indent_char, indent_size);
            }
            FacturaeXml(self).serialize(serializer)?;
        }

        Ok(buffer)
    }
}

/// Parsed `<response><code/><message/></response>` body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename = "response")]
pub struct AuthorityResponse {
    #[serde(default, alias = "Code")]
    pub code: Option<String>,
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
}

pub fn parse_response(body: &str) -> Result<AuthorityResponse, InvoiceXmlError> {
    Ok(quick_xml::de::from_str(body.trim())?)
}

mod helpers {
    use serde::ser::{Serialize, SerializeStruct, Serializer};

    /// `<TotalAmount>` wrapper used for amounts nested in a section.
    pub(super) struct Total<'a>(pub &'a str);

    impl Serialize for Total<'_> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("Total", 1)?;
            st.serialize_field("TotalAmount", self.0)?;
            st.end()
        }
    }

    /// Spanish NIFs for individuals start with a digit or a foreigner letter.
    pub(super) fn person_type_code(tax_id: &str) -> &'static str {
        match tax_id.trim().chars().next() {
            Some(c) if c.is_ascii_digit() || matches!(c, 'X' | 'Y' | 'Z' | 'K' | 'L' | 'M') => "F",
            _ => "J",
        }
    }

    pub(super) fn residence_type_code(country: isocountry::CountryCode) -> &'static str {
        if country == isocountry::CountryCode::ESP {
            "R"
        } else {
            "E"
        }
    }
}

use helpers::{Total, person_type_code, residence_type_code};

struct FacturaeXml<'a, 'b>(&'b AeatInvoice<'a>);

impl Serialize for FacturaeXml<'_, '_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let doc = self.0;
        let mut root = serializer.serialize_struct("fe:Facturae", 0)?;
        root.serialize_field("@xmlns:fe", FACTURAE_NS)?;
        root.serialize_field("FileHeader", &FileHeader(doc))?;
        root.serialize_field("Parties", &Parties(doc))?;
        root.serialize_field("Invoices", &Invoices(doc))?;
        root.end()
    }
}

struct FileHeader<'a, 'b>(&'b AeatInvoice<'a>);

impl Serialize for FileHeader<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let invoice = self.0.invoice;
        let total = amount(invoice.total_amount);
        let batch_id = format!("{}{}", self.0.issuer.tax_id, invoice.invoice_number);

        let mut st = s.serialize_struct("FileHeader", 0)?;
        st.serialize_field("SchemaVersion", SCHEMA_VERSION)?;
        st.serialize_field("Modality", "I")?;
        st.serialize_field("InvoiceIssuerType", "EM")?;
        st.serialize_field(
            "Batch",
            &Batch {
                id: &batch_id,
                total: &total,
                currency: invoice.currency.code(),
            },
        )?;
        st.end()
    }
}

struct Batch<'a> {
    id: &'a str,
    total: &'a str,
    currency: &'a str,
}

impl Serialize for Batch<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Batch", 0)?;
        st.serialize_field("BatchIdentifier", self.id)?;
        st.serialize_field("InvoicesCount", "1")?;
        st.serialize_field("TotalInvoicesAmount", &Total(self.total))?;
        st.serialize_field("TotalOutstandingAmount", &Total(self.total))?;
        st.serialize_field("TotalExecutableAmount", &Total(self.total))?;
        st.serialize_field("InvoiceCurrencyCode", self.currency)?;
        st.end()
    }
}

struct Parties<'a, 'b>(&'b AeatInvoice<'a>);

impl Serialize for Parties<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Parties", 0)?;
        st.serialize_field("SellerParty", &PartyXml(self.0.issuer))?;
        st.serialize_field("BuyerParty", &PartyXml(self.0.recipient))?;
        st.end()
    }
}

struct PartyXml<'a>(&'a Party);

impl Serialize for PartyXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let party = self.0;
        let mut st = s.serialize_struct("Party", 0)?;
        st.serialize_field("TaxIdentification", &TaxIdentification(party))?;
        st.serialize_field("LegalEntity", &LegalEntity(party))?;
        st.end()
    }
}

struct TaxIdentification<'a>(&'a Party);

impl Serialize for TaxIdentification<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let party = self.0;
        let mut st = s.serialize_struct("TaxIdentification", 0)?;
        st.serialize_field("PersonTypeCode", person_type_code(&party.tax_id))?;
        st.serialize_field("ResidenceTypeCode", residence_type_code(party.country_code))?;
        st.serialize_field("TaxIdentificationNumber", &party.tax_id)?;
        st.end()
    }
}

struct LegalEntity<'a>(&'a Party);

impl Serialize for LegalEntity<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("LegalEntity", 0)?;
        st.serialize_field("CorporateName", &self.0.name)?;
        st.serialize_field("CountryCode", self.0.country_code.alpha3())?;
        st.end()
    }
}

struct Invoices<'a, 'b>(&'b AeatInvoice<'a>);

impl Serialize for Invoices<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Invoices", 0)?;
        st.serialize_field("Invoice", &InvoiceXml(self.0))?;
        st.end()
    }
}

struct InvoiceXml<'a, 'b>(&'b AeatInvoice<'a>);

impl Serialize for InvoiceXml<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let doc = self.0;
        let invoice = doc.invoice;
        let total = amount(invoice.total_amount);
        let tax = amount(invoice.tax_amount);
        let net = amount(invoice.net_amount());
        let currency = invoice.currency.code();

        let mut st = s.serialize_struct("Invoice", 0)?;
        st.serialize_field("InvoiceHeader", &InvoiceHeader(&invoice.invoice_number))?;
        st.serialize_field("InvoiceIssueData", &IssueData { invoice, currency })?;
        st.serialize_field("TaxesOutputs", &TaxesOutputs(tax_breakdown(doc.items)))?;
        st.serialize_field(
            "InvoiceTotals",
            &Totals {
                net: &net,
                tax: &tax,
                total: &total,
            },
        )?;
        st.serialize_field("Items", &Items(doc.items))?;
        st.serialize_field("PaymentDetails", &PaymentDetails { invoice, total: &total })?;
        st.serialize_field("AdditionalData", &Verification(invoice))?;
        st.end()
    }
}

struct InvoiceHeader<'a>(&'a str);

impl Serialize for InvoiceHeader<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("InvoiceHeader", 0)?;
        st.serialize_field("InvoiceNumber", self.0)?;
        st.serialize_field("InvoiceDocumentType", "FC")?;
        st.serialize_field("InvoiceClass", "OO")?;
        st.end()
    }
}

struct IssueData<'a> {
    invoice: &'a Invoice,
    currency: &'a str,
}

impl Serialize for IssueData<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("InvoiceIssueData", 0)?;
        st.serialize_field(
            "IssueDate",
            &self.invoice.issue_date.format("%Y-%m-%d").to_string(),
        )?;
        st.serialize_field("InvoiceCurrencyCode", self.currency)?;
        st.serialize_field("TaxCurrencyCode", self.currency)?;
        st.serialize_field("LanguageName", "es")?;
        st.end()
    }
}

/// Per-rate taxable base and tax, ordered by rate.
fn tax_breakdown(items: &[InvoiceItem]) -> Vec<TaxLine> {
    let mut by_rate: BTreeMap<Decimal, (Decimal, Decimal)> = BTreeMap::new();
    for item in items {
        let entry = by_rate
            .entry(item.tax_rate.normalize())
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += item.net_amount();
        entry.1 += item.tax_amount;
    }
    by_rate
        .into_iter()
        .map(|(rate, (base, tax))| TaxLine {
            rate: amount(rate),
            base: amount(base),
            tax: amount(tax),
        })
        .collect()
}

struct TaxLine {
    rate: String,
    base: String,
    tax: String,
}

impl Serialize for TaxLine {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Tax", 0)?;
        // 01 = IVA
        st.serialize_field("TaxTypeCode", "01")?;
        st.serialize_field("TaxRate", &self.rate)?;
        st.serialize_field("TaxableBase", &Total(&self.base))?;
        st.serialize_field("TaxAmount", &Total(&self.tax))?;
        st.end()
    }
}

struct TaxesOutputs(Vec<TaxLine>);

impl Serialize for TaxesOutputs {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("TaxesOutputs", 0)?;
        st.serialize_field("Tax", &self.0)?;
        st.end()
    }
}

struct Totals<'a> {
    net: &'a str,
    tax: &'a str,
    total: &'a str,
}

impl Serialize for Totals<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("InvoiceTotals", 0)?;
        st.serialize_field("TotalGrossAmount", self.net)?;
        st.serialize_field("TotalGrossAmountBeforeTaxes", self.net)?;
        st.serialize_field("TotalTaxOutputs", self.tax)?;
        st.serialize_field("TotalTaxesWithheld", "0.00")?;
        st.serialize_field("InvoiceTotal", self.total)?;
        st.serialize_field("TotalOutstandingAmount", self.total)?;
        st.serialize_field("TotalExecutableAmount", self.total)?;
        st.end()
    }
}

struct Items<'a>(&'a [InvoiceItem]);

impl Serialize for Items<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut ordered: Vec<&InvoiceItem> = self.0.iter().collect();
        ordered.sort_by_key(|item| item.position);
        let lines: Vec<InvoiceLine<'_>> = ordered.into_iter().map(InvoiceLine).collect();

        let mut st = s.serialize_struct("Items", 0)?;
        st.serialize_field("InvoiceLine", &lines)?;
        st.end()
    }
}

struct InvoiceLine<'a>(&'a InvoiceItem);

impl Serialize for InvoiceLine<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.0;
        let net = amount(item.net_amount());
        let line_tax = vec![TaxLine {
            rate: amount(item.tax_rate),
            base: net.clone(),
            tax: amount(item.tax_amount),
        }];

        let mut st = s.serialize_struct("InvoiceLine", 0)?;
        st.serialize_field("ItemDescription", &item.description)?;
        st.serialize_field("Quantity", &item.quantity.normalize().to_string())?;
        st.serialize_field("UnitOfMeasure", "01")?;
        st.serialize_field("UnitPriceWithoutTax", &amount(item.unit_price))?;
        st.serialize_field("TotalCost", &net)?;
        st.serialize_field("GrossAmount", &net)?;
        st.serialize_field("TaxesOutputs", &TaxesOutputs(line_tax))?;
        st.end()
    }
}

struct PaymentDetails<'a> {
    invoice: &'a Invoice,
    total: &'a str,
}

impl Serialize for PaymentDetails<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("PaymentDetails", 0)?;
        st.serialize_field("Installment", &Installment(self))?;
        st.end()
    }
}

struct Installment<'a, 'b>(&'b PaymentDetails<'a>);

impl Serialize for Installment<'_, '_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Installment", 0)?;
        st.serialize_field(
            "InstallmentDueDate",
            &self.0.invoice.due_date.format("%Y-%m-%d").to_string(),
        )?;
        st.serialize_field("InstallmentAmount", self.0.total)?;
        // 02 = direct debit
        st.serialize_field("PaymentMeans", "02")?;
        st.end()
    }
}

struct Verification<'a>(&'a Invoice);

impl Serialize for Verification<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let invoice = self.0;
        let mut st = s.serialize_struct("AdditionalData", 0)?;
        st.serialize_field("AeatId", &invoice.aeat_id)?;
        if let Some(signature) = &invoice.digital_signature {
            st.serialize_field("DigitalSignature", signature)?;
        }
        if let Some(date) = invoice.signature_date {
            st.serialize_field("SignatureDate", &date.to_rfc3339())?;
        }
        st.end()
    }
}
