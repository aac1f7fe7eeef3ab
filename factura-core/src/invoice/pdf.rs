//! Printable invoice rendering.
use super::canonical::amount;
use super::qr::QrMatrix;
use super::{Invoice, InvoiceItem, Party};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};
use thiserror::Error;

const PAGE_WIDTH_PT: f32 = 595.0;
const PAGE_HEIGHT_PT: f32 = 842.0;
const MARGIN: f32 = 50.0;
const FONT_SIZE_TITLE: f32 = 16.0;
const FONT_SIZE_NORMAL: f32 = 10.0;
const FONT_SIZE_SMALL: f32 = 8.0;
const LINE_HEIGHT: f32 = 14.0;
const QR_SIZE_PT: f32 = 110.0;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("PDF content encoding failed: {0}")]
    Content(#[from] lopdf::Error),
    #[error("PDF write failed: {0}")]
    Write(String),
}

/// Inputs for a single invoice PDF.
#[derive(Debug, Clone, Copy)]
pub struct InvoicePdf<'a> {
    pub invoice: &'a Invoice,
    pub items: &'a [InvoiceItem],
    pub issuer: Option<&'a Party>,
    pub recipient: Option<&'a Party>,
    pub qr: Option<&'a QrMatrix>,
}

impl InvoicePdf<'_> {
    pub fn render(&self) -> Result<Vec<u8>, PdfError> {
        let invoice = self.invoice;
        let currency = invoice.currency.code();
        let mut pages = PageWriter::new();

        pages.text("F2", FONT_SIZE_TITLE, MARGIN, &format!("Factura {}", invoice.invoice_number));
        pages.advance(FONT_SIZE_TITLE + 6.0);
        pages.text(
            "F1",
            FONT_SIZE_NORMAL,
            MARGIN,
            &format!(
                "Fecha: {}    Vencimiento: {}",
                invoice.issue_date.format("%d/%m/%Y"),
                invoice.due_date.format("%d/%m/%Y")
            ),
        );
        pages.advance(LINE_HEIGHT);
        pages.text("F1", FONT_SIZE_SMALL, MARGIN, &format!("AEAT: {}", invoice.aeat_id));
        pages.advance(LINE_HEIGHT * 2.0);

        let party_top = pages.y;
        party_block(&mut pages, "Emisor", MARGIN, self.issuer, &invoice.issuer_id);
        pages.y = party_top;
        party_block(&mut pages, "Cliente", PAGE_WIDTH_PT / 2.0, self.recipient, &invoice.recipient_id);
        pages.advance(LINE_HEIGHT);

        let columns = [MARGIN, 300.0, 350.0, 420.0, 480.0];
        let headers = ["Concepto", "Cant.", "Precio", "IVA %", "Total"];
        for (x, header) in columns.iter().zip(headers) {
            pages.text("F2", FONT_SIZE_NORMAL, *x, header);
        }
        pages.advance(4.0);
        pages.rule(MARGIN, PAGE_WIDTH_PT - MARGIN);
        pages.advance(LINE_HEIGHT);

        let mut ordered: Vec<&InvoiceItem> = self.items.iter().collect();
        ordered.sort_by_key(|item| item.position);
        for item in ordered {
            pages.ensure_room(LINE_HEIGHT);
            let cells = [
                truncate(&item.description, 48),
                item.quantity.normalize().to_string(),
                amount(item.unit_price),
                item.tax_rate.normalize().to_string(),
                amount(item.total_amount),
            ];
            for (x, cell) in columns.iter().zip(cells.iter()) {
                pages.text("F1", FONT_SIZE_NORMAL, *x, cell);
            }
            pages.advance(LINE_HEIGHT);
        }

        pages.ensure_room(LINE_HEIGHT * 4.0);
        pages.rule(MARGIN, PAGE_WIDTH_PT - MARGIN);
        pages.advance(LINE_HEIGHT);
        let totals = [
            ("Base imponible", invoice.net_amount()),
            ("IVA", invoice.tax_amount),
            ("Total", invoice.total_amount),
        ];
        for (label, value) in totals {
            pages.text("F2", FONT_SIZE_NORMAL, 380.0, label);
            pages.text("F1", FONT_SIZE_NORMAL, 480.0, &format!("{} {currency}", amount(value)));
            pages.advance(LINE_HEIGHT);
        }

        pages.ensure_room(QR_SIZE_PT + LINE_HEIGHT * 2.0);
        pages.advance(LINE_HEIGHT);
        if let Some(qr) = self.qr {
            let top = pages.y;
            pages.qr(qr, MARGIN, top, QR_SIZE_PT);
        }
        if let Some(signature) = &invoice.digital_signature {
            pages.advance(FONT_SIZE_SMALL);
            pages.text(
                "F1",
                FONT_SIZE_SMALL,
                MARGIN + QR_SIZE_PT + 20.0,
                &format!("Firma: {}", truncate(signature, 60)),
            );
        }

        pages.finish()
    }
}

fn party_block(pages: &mut PageWriter, title: &str, x: f32, party: Option<&Party>, fallback_id: &str) {
    pages.text("F2", FONT_SIZE_NORMAL, x, title);
    pages.advance(LINE_HEIGHT);
    match party {
        Some(party) => {
            pages.text("F1", FONT_SIZE_NORMAL, x, &party.name);
            pages.advance(LINE_HEIGHT);
            pages.text("F1", FONT_SIZE_NORMAL, x, &format!("NIF: {}", party.tax_id));
        }
        None => pages.text("F1", FONT_SIZE_NORMAL, x, fallback_id),
    }
    pages.advance(LINE_HEIGHT);
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let mut short: String = value.chars().take(max_chars.saturating_sub(3)).collect();
        short.push_str("...");
        short
    }
}

/// Standard fonts use WinAnsi; anything outside Latin-1 becomes `?`.
fn latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Accumulates content operations page by page, top to bottom.
struct PageWriter {
    done: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: f32,
}

impl PageWriter {
    fn new() -> Self {
        Self {
            done: Vec::new(),
            current: Vec::new(),
            y: PAGE_HEIGHT_PT - MARGIN,
        }
    }

    fn advance(&mut self, by: f32) {
        self.y -= by;
    }

    fn ensure_room(&mut self, needed: f32) {
        if self.y - needed < MARGIN {
            self.done.push(std::mem::take(&mut self.current));
            self.y = PAGE_HEIGHT_PT - MARGIN;
        }
    }

    fn text(&mut self, font: &str, size: f32, x: f32, text: &str) {
        self.current.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), size.into()]),
            Operation::new("Td", vec![x.into(), self.y.into()]),
            Operation::new("Tj", vec![Object::String(latin1(text), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn rule(&mut self, from: f32, to: f32) {
        self.current.extend([
            Operation::new("w", vec![0.5f32.into()]),
            Operation::new("m", vec![from.into(), self.y.into()]),
            Operation::new("l", vec![to.into(), self.y.into()]),
            Operation::new("S", vec![]),
        ]);
    }

    /// Draw dark modules as filled squares, `top` being the upper edge.
    fn qr(&mut self, matrix: &QrMatrix, x: f32, top: f32, size: f32) {
        let modules = matrix.width();
        if modules == 0 {
            return;
        }
        let cell = size / modules as f32;
        self.current.push(Operation::new("g", vec![0.0f32.into()]));
        for row in 0..modules {
            for col in 0..modules {
                if matrix.is_dark(col, row) {
                    let left = x + col as f32 * cell;
                    let bottom = top - (row as f32 + 1.0) * cell;
                    self.current.push(Operation::new(
                        "re",
                        vec![left.into(), bottom.into(), cell.into(), cell.into()],
                    ));
                }
            }
        }
        self.current.push(Operation::new("f", vec![]));
    }

    fn finish(mut self) -> Result<Vec<u8>, PdfError> {
        self.done.push(self.current);

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular_id,
                "F2" => bold_id,
            },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(self.done.len());
        for operations in self.done {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id: ObjectId = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        let media_box: Vec<Object> = vec![
            0.0f32.into(),
            0.0f32.into(),
            PAGE_WIDTH_PT.into(),
            PAGE_HEIGHT_PT.into(),
        ];
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => media_box,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|e| PdfError::Write(format!("{e:?}")))?;
        Ok(output)
    }
}
