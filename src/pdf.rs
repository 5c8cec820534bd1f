//! Minimal PDF 1.4 writer for report documents.
//!
//! Layout is expressed in millimetres from the top-left corner of an A4
//! portrait page and converted to PDF points when drawing. Text uses the
//! standard Helvetica faces with `WinAnsiEncoding`; image data is
//! Flate-compressed.

use crate::error::{ReportError, Result};
use crate::report::{ChartImage, DetailTable, DocumentRenderer, ImageFormat, LegendEntry, Section};
use async_trait::async_trait;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;
use std::fmt::Write as _;
use std::io::Write as _;

const PAGE_WIDTH_MM: f64 = 210.0;
const PAGE_HEIGHT_MM: f64 = 297.0;
const MARGIN_MM: f64 = 10.0;
const POINTS_PER_MM: f64 = 72.0 / 25.4;

const CHART_WIDTH_MM: f64 = 180.0;
const CHART_HEIGHT_MM: f64 = 80.0;
const LEGEND_SIZE: f64 = 9.0;
const LEGEND_LINE_MM: f64 = 5.0;
const LEGEND_SEPARATOR: &str = "    ";
const ROW_HEIGHT_MM: f64 = 7.0;
const CELL_PADDING_MM: f64 = 1.5;
const COLUMN_WIDTHS_MM: [f64; 5] = [28.0, 50.0, 42.0, 44.0, 26.0];

const HEADER_FILL: (f64, f64, f64) = (0.0, 74.0 / 255.0, 173.0 / 255.0);

const REGULAR_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";

/// Renders report sections into a single A4 PDF.
#[derive(Debug, Clone)]
pub struct PdfDocumentRenderer {
    pub title_size: f64,
    pub narrative_size: f64,
    pub table_size: f64,
}

impl Default for PdfDocumentRenderer {
    fn default() -> Self {
        Self {
            title_size: 16.0,
            narrative_size: 12.0,
            table_size: 10.0,
        }
    }
}

struct EmbeddedImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Page-by-page drawing state.
struct Layout {
    pages: Vec<String>,
    current: String,
    cursor_mm: f64,
    images: Vec<EmbeddedImage>,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: String::new(),
            cursor_mm: MARGIN_MM,
            images: Vec::new(),
        }
    }

    fn new_page(&mut self) {
        let finished = std::mem::take(&mut self.current);
        self.pages.push(finished);
        self.cursor_mm = MARGIN_MM;
    }

    /// Starts a new page unless `height_mm` still fits below the cursor.
    /// Returns true when a page break happened.
    fn ensure_space(&mut self, height_mm: f64) -> bool {
        if self.cursor_mm + height_mm > PAGE_HEIGHT_MM - MARGIN_MM && self.cursor_mm > MARGIN_MM {
            self.new_page();
            return true;
        }
        false
    }

    fn text(&mut self, x_mm: f64, baseline_mm: f64, size: f64, font: &str, text: &str) {
        let _ = writeln!(
            self.current,
            "BT /{} {:.1} Tf {:.2} {:.2} Td ({}) Tj ET",
            font,
            size,
            x_mm * POINTS_PER_MM,
            to_pdf_y(baseline_mm),
            escape_text(text)
        );
    }

    fn fill_color(&mut self, (r, g, b): (f64, f64, f64)) {
        let _ = writeln!(self.current, "{:.3} {:.3} {:.3} rg", r, g, b);
    }

    fn rect(&mut self, x_mm: f64, top_mm: f64, width_mm: f64, height_mm: f64, op: &str) {
        let _ = writeln!(
            self.current,
            "{:.2} {:.2} {:.2} {:.2} re {}",
            x_mm * POINTS_PER_MM,
            to_pdf_y(top_mm + height_mm),
            width_mm * POINTS_PER_MM,
            height_mm * POINTS_PER_MM,
            op
        );
    }

    fn image(&mut self, image: EmbeddedImage, x_mm: f64, top_mm: f64) {
        self.images.push(image);
        let _ = writeln!(
            self.current,
            "q {:.2} 0 0 {:.2} {:.2} {:.2} cm /Im{} Do Q",
            CHART_WIDTH_MM * POINTS_PER_MM,
            CHART_HEIGHT_MM * POINTS_PER_MM,
            x_mm * POINTS_PER_MM,
            to_pdf_y(top_mm + CHART_HEIGHT_MM),
            self.images.len()
        );
    }

    fn finish(mut self) -> (Vec<String>, Vec<EmbeddedImage>) {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.new_page();
        }
        (self.pages, self.images)
    }
}

fn to_pdf_y(top_mm: f64) -> f64 {
    (PAGE_HEIGHT_MM - top_mm) * POINTS_PER_MM
}

/// Escapes a string for a PDF literal shown with `WinAnsiEncoding`.
///
/// Printable ASCII passes through, other characters the encoding covers
/// become octal escapes, anything else is replaced by `?`.
fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' | '(' | ')' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            ' '..='~' => escaped.push(ch),
            c if c.is_whitespace() => escaped.push(' '),
            c => match win_ansi_code(c) {
                Some(code) => {
                    let _ = write!(escaped, "\\{:03o}", code);
                }
                None => escaped.push('?'),
            },
        }
    }
    escaped
}

/// Byte for `ch` in the Windows-1252 based `WinAnsiEncoding`.
fn win_ansi_code(ch: char) -> Option<u8> {
    let code = match ch {
        '\u{a0}'..='\u{ff}' => ch as u32 as u8,
        '\u{20ac}' => 0x80,
        '\u{201a}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201e}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02c6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8a,
        '\u{2039}' => 0x8b,
        '\u{0152}' => 0x8c,
        '\u{017d}' => 0x8e,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201c}' => 0x93,
        '\u{201d}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02dc}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9a,
        '\u{203a}' => 0x9b,
        '\u{0153}' => 0x9c,
        '\u{017e}' => 0x9e,
        '\u{0178}' => 0x9f,
        _ => return None,
    };
    Some(code)
}

/// Flows legend entries into lines that fit `width_mm` at `size` points.
fn legend_lines(legend: &[LegendEntry], width_mm: f64, size: f64) -> Vec<String> {
    let glyph_mm = size * 0.5 / POINTS_PER_MM;
    let max_chars = (width_mm / glyph_mm).floor().max(1.0) as usize;

    let mut lines = Vec::new();
    let mut current = String::new();
    for entry in legend {
        let text = fit_text(&entry.text(), width_mm, size);
        let needed = if current.is_empty() {
            text.chars().count()
        } else {
            current.chars().count() + LEGEND_SEPARATOR.len() + text.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str(LEGEND_SEPARATOR);
        }
        current.push_str(&text);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Shortens `text` to roughly fit `width_mm` at `size` points, assuming the
/// average Helvetica glyph is half an em wide.
fn fit_text(text: &str, width_mm: f64, size: f64) -> String {
    let glyph_mm = size * 0.5 / POINTS_PER_MM;
    let max_chars = (width_mm / glyph_mm).floor().max(1.0) as usize;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(2)).collect();
    format!("{}..", kept)
}

impl PdfDocumentRenderer {
    pub fn render_sections(&self, sections: &[Section]) -> Result<Vec<u8>> {
        let mut layout = Layout::new();

        for section in sections {
            match section {
                Section::Title(title) => {
                    layout.ensure_space(10.0);
                    let baseline = layout.cursor_mm + 5.0;
                    layout.fill_color((0.0, 0.0, 0.0));
                    layout.text(MARGIN_MM, baseline, self.title_size, BOLD_FONT, title);
                    layout.cursor_mm = baseline + 5.0;
                }
                Section::Chart {
                    label,
                    image,
                    legend,
                } => {
                    self.draw_chart(&mut layout, label, image, legend)?;
                }
                Section::ChartPlaceholder { label, note } => {
                    layout.ensure_space(28.0);
                    let baseline = layout.cursor_mm + 5.0;
                    layout.fill_color((0.0, 0.0, 0.0));
                    layout.text(MARGIN_MM, baseline, 11.0, BOLD_FONT, label);
                    let top = baseline + 2.0;
                    let _ = writeln!(layout.current, "0.6 0.6 0.6 RG 0.5 w");
                    layout.rect(MARGIN_MM, top, CHART_WIDTH_MM, 18.0, "S");
                    layout.fill_color((0.4, 0.4, 0.4));
                    layout.text(MARGIN_MM + 4.0, top + 10.5, 10.0, REGULAR_FONT, note);
                    layout.cursor_mm = top + 22.0;
                }
                Section::Narrative(line) => {
                    layout.ensure_space(7.0);
                    let baseline = layout.cursor_mm + 5.0;
                    layout.fill_color((0.0, 0.0, 0.0));
                    layout.text(MARGIN_MM, baseline, self.narrative_size, REGULAR_FONT, line);
                    layout.cursor_mm += 7.0;
                }
                Section::Table(table) => {
                    self.draw_table(&mut layout, table)?;
                }
            }
        }

        let (pages, images) = layout.finish();
        debug!(
            "Laid out {} sections on {} pages with {} images",
            sections.len(),
            pages.len(),
            images.len()
        );
        write_pdf(&pages, &images)
    }

    fn draw_chart(
        &self,
        layout: &mut Layout,
        label: &str,
        image: &ChartImage,
        legend: &[LegendEntry],
    ) -> Result<()> {
        let lines = legend_lines(legend, CHART_WIDTH_MM, LEGEND_SIZE);
        let leading_lines = lines.len().min(2) as f64;
        layout.ensure_space(CHART_HEIGHT_MM + 12.0 + leading_lines * LEGEND_LINE_MM);
        let baseline = layout.cursor_mm + 5.0;
        layout.fill_color((0.0, 0.0, 0.0));
        layout.text(MARGIN_MM, baseline, 11.0, BOLD_FONT, label);
        let top = baseline + 2.0;

        match &image.format {
            ImageFormat::RawRgb { width, height } => {
                let expected = (*width as usize)
                    .checked_mul(*height as usize)
                    .and_then(|area| area.checked_mul(3));
                if *width == 0 || *height == 0 || expected != Some(image.bytes.len()) {
                    return Err(ReportError::document(format!(
                        "chart '{}' has {} pixel bytes, which does not match {}x{} RGB",
                        label,
                        image.bytes.len(),
                        width,
                        height
                    )));
                }
                layout.image(
                    EmbeddedImage {
                        width: *width,
                        height: *height,
                        pixels: image.bytes.clone(),
                    },
                    MARGIN_MM,
                    top,
                );
            }
            other => {
                layout.fill_color((0.4, 0.4, 0.4));
                layout.text(
                    MARGIN_MM + 4.0,
                    top + 10.0,
                    10.0,
                    REGULAR_FONT,
                    &format!("Chart image format {:?} cannot be embedded", other),
                );
            }
        }

        layout.cursor_mm = top + CHART_HEIGHT_MM + 1.0;
        layout.fill_color((0.0, 0.0, 0.0));
        for line in &lines {
            layout.ensure_space(LEGEND_LINE_MM);
            let baseline = layout.cursor_mm + LEGEND_LINE_MM - 1.0;
            layout.text(MARGIN_MM, baseline, LEGEND_SIZE, REGULAR_FONT, line);
            layout.cursor_mm += LEGEND_LINE_MM;
        }
        layout.cursor_mm += 3.0;
        Ok(())
    }

    fn draw_table(&self, layout: &mut Layout, table: &DetailTable) -> Result<()> {
        if table.columns.len() != COLUMN_WIDTHS_MM.len() {
            return Err(ReportError::document(format!(
                "detail table has {} columns, expected {}",
                table.columns.len(),
                COLUMN_WIDTHS_MM.len()
            )));
        }

        layout.ensure_space(ROW_HEIGHT_MM * 2.0);
        layout.cursor_mm += 3.0;
        self.draw_row(layout, &table.columns, true);

        for row in &table.rows {
            if layout.ensure_space(ROW_HEIGHT_MM) {
                self.draw_row(layout, &table.columns, true);
            }
            self.draw_row(layout, row, false);
        }
        Ok(())
    }

    fn draw_row(&self, layout: &mut Layout, cells: &[String], header: bool) {
        let top = layout.cursor_mm;
        let mut x = MARGIN_MM;

        for (cell, width) in cells.iter().zip(COLUMN_WIDTHS_MM) {
            if header {
                layout.fill_color(HEADER_FILL);
                layout.rect(x, top, width, ROW_HEIGHT_MM, "f");
                layout.fill_color((1.0, 1.0, 1.0));
            } else {
                layout.fill_color((0.0, 0.0, 0.0));
            }
            let _ = writeln!(layout.current, "0.6 0.6 0.6 RG 0.3 w");
            layout.rect(x, top, width, ROW_HEIGHT_MM, "S");

            let font = if header { BOLD_FONT } else { REGULAR_FONT };
            let text = fit_text(cell, width - CELL_PADDING_MM * 2.0, self.table_size);
            layout.text(
                x + CELL_PADDING_MM,
                top + ROW_HEIGHT_MM - 2.2,
                self.table_size,
                font,
                &text,
            );
            x += width;
        }

        layout.cursor_mm = top + ROW_HEIGHT_MM;
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let compress_error = |e: std::io::Error| ReportError::document(format!("failed to compress stream: {}", e));
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 8), Compression::default());
    encoder.write_all(data).map_err(compress_error)?;
    encoder.finish().map_err(compress_error)
}

fn stream_object(dictionary: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + dictionary.len() + 32);
    body.extend_from_slice(
        format!("<< {} /Length {} >>\nstream\n", dictionary, data.len()).as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(b"\nendstream");
    body
}

/// Serializes pages and images into PDF objects with a cross-reference table.
fn write_pdf(pages: &[String], images: &[EmbeddedImage]) -> Result<Vec<u8>> {
    // 1 catalog, 2 page tree, 3-4 fonts, then images, resources and
    // a (page, content) pair per page.
    let first_image_id = 5;
    let resources_id = first_image_id + images.len();
    let first_page_id = resources_id + 1;
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| first_page_id + i * 2).collect();

    let mut objects: Vec<Vec<u8>> = Vec::new();
    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());

    let kids: Vec<String> = page_ids.iter().map(|id| format!("{} 0 R", id)).collect();
    objects.push(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        )
        .into_bytes(),
    );
    objects.push(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    );
    objects.push(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    );

    for image in images {
        objects.push(stream_object(
            &format!(
                "/Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /FlateDecode",
                image.width, image.height
            ),
            &deflate(&image.pixels)?,
        ));
    }

    let xobjects: Vec<String> = (0..images.len())
        .map(|i| format!("/Im{} {} 0 R", i + 1, first_image_id + i))
        .collect();
    objects.push(
        format!(
            "<< /Font << /{} 3 0 R /{} 4 0 R >> /XObject << {} >> >>",
            REGULAR_FONT,
            BOLD_FONT,
            xobjects.join(" ")
        )
        .into_bytes(),
    );

    for (page_id, content) in page_ids.iter().zip(pages) {
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] /Resources {} 0 R /Contents {} 0 R >>",
                PAGE_WIDTH_MM * POINTS_PER_MM,
                PAGE_HEIGHT_MM * POINTS_PER_MM,
                resources_id,
                page_id + 1
            )
            .into_bytes(),
        );
        objects.push(stream_object("", content.as_bytes()));
    }

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = writeln!(xref, "{:010} 00000 n ", offset);
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    );
    out.extend_from_slice(xref.as_bytes());
    Ok(out)
}

#[async_trait]
impl DocumentRenderer for PdfDocumentRenderer {
    async fn compose(&self, sections: &[Section]) -> Result<Vec<u8>> {
        self.render_sections(sections)
    }
}
