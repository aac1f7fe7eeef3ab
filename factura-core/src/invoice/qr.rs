use super::Invoice;
use base64ct::{Base64, Encoding};
use chrono::NaiveDate;
use image::{GrayImage, ImageFormat, imageops};
use qrcode::{EcLevel, QrCode, types::Color};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QrCodeError {
    #[error("QR payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("QR symbol could not be built: {0}")]
    Symbol(#[from] qrcode::types::QrError),
    #[error("QR image error: {0}")]
    Image(String),
    #[error("QR code width must be at least {min} pixels (got {width})")]
    WidthTooSmall { width: u32, min: u32 },
}

pub type QrResult<T> = std::result::Result<T, QrCodeError>;

const QUIET_ZONE: u32 = 4;
const DEFAULT_WIDTH: u32 = 300;

/// Compact verification payload carried by the invoice QR code.
///
/// Serialized as JSON with single-letter keys to keep the symbol small.
///
/// # Examples
/// ```rust
/// use chrono::NaiveDate;
/// use factura_core::invoice::QrPayload;
/// use rust_decimal::Decimal;
///
/// let payload = QrPayload::new(
///     "FAC-2026-000001",
///     "0d6c6a3e-58c4-4d43-9b7e-4d5a4f3f1a11",
///     Decimal::new(30250, 2),
///     NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
///     "https://school.example/verify/FAC-2026-000001",
/// );
/// let encoded = payload.encode()?;
/// assert_eq!(QrPayload::decode(&encoded)?, payload);
/// # Ok::<(), factura_core::invoice::QrCodeError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    #[serde(rename = "n")]
    invoice_number: String,
    #[serde(rename = "a")]
    aeat_id: String,
    #[serde(rename = "t")]
    total_amount: Decimal,
    #[serde(rename = "d")]
    issue_date: NaiveDate,
    #[serde(rename = "u")]
    verification_url: String,
}

impl QrPayload {
    pub fn new(
        invoice_number: impl Into<String>,
        aeat_id: impl Into<String>,
        total_amount: Decimal,
        issue_date: NaiveDate,
        verification_url: impl Into<String>,
    ) -> Self {
        Self {
            invoice_number: invoice_number.into(),
            aeat_id: aeat_id.into(),
            total_amount,
            issue_date,
            verification_url: verification_url.into(),
        }
    }

    pub fn from_invoice(invoice: &Invoice, verification_base_url: &str) -> Self {
        Self::new(
            invoice.invoice_number.clone(),
            invoice.aeat_id.clone(),
            invoice.total_amount,
            invoice.issue_date,
            verification_url(verification_base_url, &invoice.invoice_number),
        )
    }

    pub fn encode(&self) -> QrResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> QrResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn aeat_id(&self) -> &str {
        &self.aeat_id
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn verification_url(&self) -> &str {
        &self.verification_url
    }
}

/// Public verification link for an invoice number.
pub fn verification_url(base_url: &str, invoice_number: &str) -> String {
    format!("{}/verify/{}", base_url.trim_end_matches('/'), invoice_number)
}

/// Dark/light module grid of a QR symbol, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrMatrix {
    width: usize,
    dark: Vec<bool>,
}

impl QrMatrix {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        self.dark.get(y * self.width + x).copied().unwrap_or(false)
    }
}

/// Renders [`QrPayload`]s into PNG data URLs at error-correction level H.
#[derive(Debug, Clone, Copy)]
pub struct QrCodeGenerator {
    width: u32,
}

impl Default for QrCodeGenerator {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
        }
    }
}

impl QrCodeGenerator {
    pub fn with_width(width: u32) -> QrResult<Self> {
        let min = 21 + QUIET_ZONE * 2;
        if width < min {
            return Err(QrCodeError::WidthTooSmall { width, min });
        }
        Ok(Self { width })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn modules(&self, payload: &QrPayload) -> QrResult<QrMatrix> {
        let code = QrCode::with_error_correction_level(payload.encode()?.as_bytes(), EcLevel::H)?;
        Ok(QrMatrix {
            width: code.width(),
            dark: code
                .to_colors()
                .into_iter()
                .map(|color| color == Color::Dark)
                .collect(),
        })
    }

    /// Encode the payload and return `data:image/png;base64,...`.
    pub fn generate(&self, payload: &QrPayload) -> QrResult<String> {
        let png = self.render_png(payload)?;
        Ok(format!("data:image/png;base64,{}", Base64::encode_string(&png)))
    }

    pub fn render_png(&self, payload: &QrPayload) -> QrResult<Vec<u8>> {
        let matrix = self.modules(payload)?;
        let modules = matrix.width() as u32;
        let size = modules + QUIET_ZONE * 2;
        let scale = (self.width / size).max(1);
        let img_size = size * scale;

        let mut img_buf = vec![255u8; (img_size * img_size) as usize];
        for y in 0..modules {
            for x in 0..modules {
                if !matrix.is_dark(x as usize, y as usize) {
                    continue;
                }
                let px = (x + QUIET_ZONE) * scale;
                let py = (y + QUIET_ZONE) * scale;
                for dy in 0..scale {
                    let row = ((py + dy) * img_size + px) as usize;
                    img_buf[row..row + scale as usize].fill(0);
                }
            }
        }

        let gray = GrayImage::from_raw(img_size, img_size, img_buf)
            .ok_or_else(|| QrCodeError::Image("pixel buffer size mismatch".to_string()))?;
        let gray = if img_size == self.width {
            gray
        } else {
            imageops::resize(&gray, self.width, self.width, imageops::FilterType::Nearest)
        };

        let mut png = Vec::new();
        gray.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| QrCodeError::Image(e.to_string()))?;
        Ok(png)
    }
}
