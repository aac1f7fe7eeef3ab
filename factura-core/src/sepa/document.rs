//! pain.008.001.02 customer direct-debit initiation.
use chrono::{NaiveDate, NaiveDateTime};
use quick_xml::se::Serializer as QuickXmlSerializer;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SepaError;
use super::installments::{SequenceType, check_amount, split_installments};
use super::mandate::{BankAccount, Creditor, compact_iban};
use crate::invoice::canonical::amount;
use crate::invoice::round_money;

pub const PAIN_008_NS: &str = "urn:iso:std:iso:20022:tech:xsd:pain.008.001.02";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

const MAX_ID: usize = 35;
const MAX_NAME: usize = 70;
const MAX_REMITTANCE: usize = 140;

/// What is being collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectDebitPayment {
    pub description: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

/// One generated pain.008 file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SepaFile {
    pub file_name: String,
    pub xml: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub sequence: SequenceType,
}

/// Direct-debit order as submitted by callers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectDebitRequest {
    pub creditor: Creditor,
    pub bank_account: BankAccount,
    pub payment: DirectDebitPayment,
    /// Split into this many monthly collections.
    #[serde(default)]
    pub installments: Option<u32>,
}

impl DirectDebitRequest {
    /// True unless a single `OOFF` collection was asked for.
    pub fn is_plan(&self) -> bool {
        matches!(self.installments, Some(count) if count != 1)
    }

    pub fn generate(self, created_at: NaiveDateTime) -> Result<Vec<SepaFile>, SepaError> {
        let generator = DirectDebitGenerator::new(self.creditor, created_at)?;
        match self.installments {
            Some(count) if count != 1 => {
                generator.installments(&self.bank_account, &self.payment, count)
            }
            _ => Ok(vec![generator.single(&self.bank_account, &self.payment)?]),
        }
    }
}

/// Builds direct-debit files for one creditor.
#[derive(Debug, Clone)]
pub struct DirectDebitGenerator {
    creditor: Creditor,
    created_at: NaiveDateTime,
}

impl DirectDebitGenerator {
    pub fn new(creditor: Creditor, created_at: NaiveDateTime) -> Result<Self, SepaError> {
        creditor.validate()?;
        Ok(Self {
            creditor,
            created_at,
        })
    }

    /// Single `OOFF` collection.
    pub fn single(
        &self,
        account: &BankAccount,
        payment: &DirectDebitPayment,
    ) -> Result<SepaFile, SepaError> {
        validate_request(account, payment)?;
        let amount = round_money(payment.amount);
        let xml = self.render(
            account,
            &payment.description,
            amount,
            payment.due_date,
            SequenceType::OneOff,
            None,
        )?;
        debug!(mandate = %account.mandate_reference, %amount, "built SEPA direct debit");
        Ok(SepaFile {
            file_name: file_name(&account.mandate_reference, None),
            xml,
            amount,
            due_date: payment.due_date,
            sequence: SequenceType::OneOff,
        })
    }

    /// One file per monthly installment of `payment.amount`, starting at
    /// `payment.due_date`.
    pub fn installments(
        &self,
        account: &BankAccount,
        payment: &DirectDebitPayment,
        count: u32,
    ) -> Result<Vec<SepaFile>, SepaError> {
        validate_request(account, payment)?;
        let plan = split_installments(payment.amount, count, payment.due_date)?;
        debug!(
            mandate = %account.mandate_reference,
            count,
            "built SEPA installment plan"
        );
        plan.into_iter()
            .map(|part| {
                let position = (part.count > 1).then_some((part.index, part.count));
                let description = match position {
                    Some((k, n)) => format!("{} ({k}/{n})", payment.description),
                    None => payment.description.clone(),
                };
                let xml = self.render(
                    account,
                    &description,
                    part.amount,
                    part.due_date,
                    part.sequence,
                    position,
                )?;
                Ok(SepaFile {
                    file_name: file_name(&account.mandate_reference, position),
                    xml,
                    amount: part.amount,
                    due_date: part.due_date,
                    sequence: part.sequence,
                })
            })
            .collect()
    }

    fn render(
        &self,
        account: &BankAccount,
        description: &str,
        amount_due: Decimal,
        due_date: NaiveDate,
        sequence: SequenceType,
        position: Option<(u32, u32)>,
    ) -> Result<String, SepaError> {
        let reference = account.mandate_reference.trim();
        let suffix = position
            .map(|(k, n)| format!("-{k}of{n}"))
            .unwrap_or_default();
        let stamp = self.created_at.format("%Y%m%d%H%M%S");
        let message_id = identifier(&format!("{stamp}-{reference}"), &suffix);
        let control_sum = amount(amount_due);
        let creditor_name = clip(&self.creditor.name, MAX_NAME);

        let document = Document {
            xmlns: PAIN_008_NS,
            xmlns_xsi: XSI_NS,
            initiation: Initiation {
                group_header: GroupHeader {
                    message_id: message_id.clone(),
                    created_at: self.created_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
                    transactions: 1,
                    control_sum: control_sum.clone(),
                    initiating_party: Name {
                        name: creditor_name.clone(),
                    },
                },
                payment_information: PaymentInformation {
                    id: message_id,
                    method: "DD",
                    transactions: 1,
                    control_sum: control_sum.clone(),
                    payment_type: PaymentType {
                        service_level: Code { code: "SEPA" },
                        local_instrument: Code { code: "CORE" },
                        sequence: sequence.as_str(),
                    },
                    collection_date: due_date,
                    creditor: Name {
                        name: creditor_name,
                    },
                    creditor_account: Account {
                        id: IbanId {
                            iban: compact_iban(&self.creditor.iban),
                        },
                    },
                    creditor_agent: Agent {
                        institution: Institution {
                            bic: self.creditor.bic.trim().to_string(),
                        },
                    },
                    charge_bearer: "SLEV",
                    scheme_id: SchemeId {
                        id: PrivateIdWrapper {
                            private: PrivateId {
                                other: Other {
                                    id: self.creditor.creditor_id.trim().to_string(),
                                    scheme: SchemeName { proprietary: "SEPA" },
                                },
                            },
                        },
                    },
                    transaction: Transaction {
                        payment_id: PaymentId {
                            end_to_end_id: identifier(reference, &suffix),
                        },
                        amount: InstructedAmount {
                            currency: "EUR",
                            value: control_sum,
                        },
                        direct_debit: DirectDebitDetails {
                            mandate: Mandate {
                                id: reference.to_string(),
                                signed_on: account.mandate_date,
                            },
                        },
                        debtor_agent: Agent {
                            institution: Institution {
                                bic: account.bic.trim().to_string(),
                            },
                        },
                        debtor: Name {
                            name: clip(&account.account_holder, MAX_NAME),
                        },
                        debtor_account: Account {
                            id: IbanId {
                                iban: account.iban(),
                            },
                        },
                        remittance: Remittance {
                            unstructured: clip(description, MAX_REMITTANCE),
                        },
                    },
                },
            },
        };

        let mut buffer = String::with_capacity(4096);
        buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        buffer.push('\n');
        let mut serializer = QuickXmlSerializer::new(&mut buffer);
        serializer.indent(' ', 2);
        document.serialize(serializer)?;
        Ok(buffer)
    }
}

/// `sepa-direct-debit-<reference>.xml`, or `...-<k>of<N>.xml` for installments.
pub fn file_name(mandate_reference: &str, position: Option<(u32, u32)>) -> String {
    let reference: String = mandate_reference
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    match position {
        Some((k, n)) => format!("sepa-direct-debit-{reference}-{k}of{n}.xml"),
        None => format!("sepa-direct-debit-{reference}.xml"),
    }
}

fn validate_request(account: &BankAccount, payment: &DirectDebitPayment) -> Result<(), SepaError> {
    account.validate()?;
    check_amount(payment.amount)?;
    Ok(())
}

/// `head` clipped so that `suffix` always survives within [`MAX_ID`].
fn identifier(head: &str, suffix: &str) -> String {
    let room = MAX_ID.saturating_sub(suffix.chars().count());
    let mut id: String = head.chars().take(room).collect();
    id.push_str(suffix);
    id
}

fn clip(value: &str, max: usize) -> String {
    value.trim().chars().take(max).collect()
}

#[derive(Serialize)]
#[serde(rename = "Document")]
struct Document {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "@xmlns:xsi")]
    xmlns_xsi: &'static str,
    #[serde(rename = "CstmrDrctDbtInitn")]
    initiation: Initiation,
}

#[derive(Serialize)]
struct Initiation {
    #[serde(rename = "GrpHdr")]
    group_header: GroupHeader,
    #[serde(rename = "PmtInf")]
    payment_information: PaymentInformation,
}

#[derive(Serialize)]
struct GroupHeader {
    #[serde(rename = "MsgId")]
    message_id: String,
    #[serde(rename = "CreDtTm")]
    created_at: String,
    #[serde(rename = "NbOfTxs")]
    transactions: u32,
    #[serde(rename = "CtrlSum")]
    control_sum: String,
    #[serde(rename = "InitgPty")]
    initiating_party: Name,
}

#[derive(Serialize)]
struct PaymentInformation {
    #[serde(rename = "PmtInfId")]
    id: String,
    #[serde(rename = "PmtMtd")]
    method: &'static str,
    #[serde(rename = "NbOfTxs")]
    transactions: u32,
    #[serde(rename = "CtrlSum")]
    control_sum: String,
    #[serde(rename = "PmtTpInf")]
    payment_type: PaymentType,
    #[serde(rename = "ReqdColltnDt")]
    collection_date: NaiveDate,
    #[serde(rename = "Cdtr")]
    creditor: Name,
    #[serde(rename = "CdtrAcct")]
    creditor_account: Account,
    #[serde(rename = "CdtrAgt")]
    creditor_agent: Agent,
    #[serde(rename = "ChrgBr")]
    charge_bearer: &'static str,
    #[serde(rename = "CdtrSchmeId")]
    scheme_id: SchemeId,
    #[serde(rename = "DrctDbtTxInf")]
    transaction: Transaction,
}

#[derive(Serialize)]
struct PaymentType {
    #[serde(rename = "SvcLvl")]
    service_level: Code,
    #[serde(rename = "LclInstrm")]
    local_instrument: Code,
    #[serde(rename = "SeqTp")]
    sequence: &'static str,
}

#[derive(Serialize)]
struct Code {
    #[serde(rename = "Cd")]
    code: &'static str,
}

#[derive(Serialize)]
struct Name {
    #[serde(rename = "Nm")]
    name: String,
}

#[derive(Serialize)]
struct Account {
    #[serde(rename = "Id")]
    id: IbanId,
}

#[derive(Serialize)]
struct IbanId {
    #[serde(rename = "IBAN")]
    iban: String,
}

#[derive(Serialize)]
struct Agent {
    #[serde(rename = "FinInstnId")]
    institution: Institution,
}

#[derive(Serialize)]
struct Institution {
    #[serde(rename = "BIC")]
    bic: String,
}

#[derive(Serialize)]
struct SchemeId {
    #[serde(rename = "Id")]
    id: PrivateIdWrapper,
}

#[derive(Serialize)]
struct PrivateIdWrapper {
    #[serde(rename = "PrvtId")]
    private: PrivateId,
}

#[derive(Serialize)]
struct PrivateId {
    #[serde(rename = "Othr")]
    other: Other,
}

#[derive(Serialize)]
struct Other {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "SchmeNm")]
    scheme: SchemeName,
}

#[derive(Serialize)]
struct SchemeName {
    #[serde(rename = "Prtry")]
    proprietary: &'static str,
}

#[derive(Serialize)]
struct Transaction {
    #[serde(rename = "PmtId")]
    payment_id: PaymentId,
    #[serde(rename = "InstdAmt")]
    amount: InstructedAmount,
    #[serde(rename = "DrctDbtTx")]
    direct_debit: DirectDebitDetails,
    #[serde(rename = "DbtrAgt")]
    debtor_agent: Agent,
    #[serde(rename = "Dbtr")]
    debtor: Name,
    #[serde(rename = "DbtrAcct")]
    debtor_account: Account,
    #[serde(rename = "RmtInf")]
    remittance: Remittance,
}

#[derive(Serialize)]
struct PaymentId {
    #[serde(rename = "EndToEndId")]
    end_to_end_id: String,
}

#[derive(Serialize)]
struct InstructedAmount {
    #[serde(rename = "@Ccy")]
    currency: &'static str,
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Serialize)]
struct DirectDebitDetails {
    #[serde(rename = "MndtRltdInf")]
    mandate: Mandate,
}

#[derive(Serialize)]
struct Mandate {
    #[serde(rename = "MndtId")]
    id: String,
    #[serde(rename = "DtOfSgntr")]
    signed_on: NaiveDate,
}

#[derive(Serialize)]
struct Remittance {
    #[serde(rename = "Ustrd")]
    unstructured: String,
}
