//! Minutes PDF rendering.

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference};

use conclave_core::models::id::RoomId;
use conclave_core::{Error, Result};

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 18.0;
const LINE_HEIGHT_MM: f32 = 5.2;
const BODY_FONT_SIZE: f32 = 10.0;
const HEADING_FONT_SIZE: f32 = 13.0;
const TITLE_FONT_SIZE: f32 = 18.0;
const MAX_LINE_CHARS: usize = 96;

struct PageWriter<'a> {
    doc: &'a PdfDocumentReference,
    regular: &'a IndirectFontRef,
    bold: &'a IndirectFontRef,
    layer: printpdf::PdfLayerReference,
    cursor_mm: f32,
}

impl<'a> PageWriter<'a> {
    fn new(
        doc: &'a PdfDocumentReference,
        regular: &'a IndirectFontRef,
        bold: &'a IndirectFontRef,
        layer: printpdf::PdfLayerReference,
    ) -> Self {
        Self {
            doc,
            regular,
            bold,
            layer,
            cursor_mm: PAGE_HEIGHT_MM - MARGIN_MM,
        }
    }

    fn ensure_room(&mut self, needed_mm: f32) {
        if self.cursor_mm - needed_mm < MARGIN_MM {
            let (page, layer) = self
                .doc
                .add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "content");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.cursor_mm = PAGE_HEIGHT_MM - MARGIN_MM;
        }
    }

    fn write_line(&mut self, text: &str, size: f32, bold: bool) {
        self.ensure_room(LINE_HEIGHT_MM);
        self.cursor_mm -= LINE_HEIGHT_MM;
        let font = if bold { self.bold } else { self.regular };
        self.layer
            .use_text(text, size, Mm(MARGIN_MM), Mm(self.cursor_mm), font);
    }

    fn write_wrapped(&mut self, text: &str, size: f32) {
        for line in wrap_line(text, MAX_LINE_CHARS) {
            self.write_line(&line, size, false);
        }
    }

    fn blank_line(&mut self) {
        self.cursor_mm -= LINE_HEIGHT_MM;
    }
}

/// Greedy word wrap; a single overlong word lands on its own line.
fn wrap_line(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(current);
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Render the minutes document: title, summary section, full transcript.
pub fn render_minutes(room_id: &RoomId, summary: &str, transcript: &str) -> Result<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        format!("Minutes - {room_id}"),
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "content",
    );
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| Error::Internal(format!("PDF font: {e}")))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| Error::Internal(format!("PDF font: {e}")))?;

    let layer = doc.get_page(page).get_layer(layer);
    let mut writer = PageWriter::new(&doc, &regular, &bold, layer);

    writer.write_line(&format!("Minutes - {room_id}"), TITLE_FONT_SIZE, true);
    writer.blank_line();

    writer.write_line("Summary", HEADING_FONT_SIZE, true);
    for line in summary.lines() {
        writer.write_wrapped(line, BODY_FONT_SIZE);
    }
    writer.blank_line();

    writer.write_line("Transcript", HEADING_FONT_SIZE, true);
    for line in transcript.lines() {
        writer.write_wrapped(line, BODY_FONT_SIZE);
    }

    doc.save_to_bytes()
        .map_err(|e| Error::Internal(format!("PDF render: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_line() {
        let wrapped = wrap_line("alpha beta gamma delta", 11);
        assert_eq!(wrapped, vec!["alpha beta", "gamma delta"]);

        let single = wrap_line("short", 20);
        assert_eq!(single, vec!["short"]);

        let overlong = wrap_line("supercalifragilistic", 5);
        assert_eq!(overlong, vec!["supercalifragilistic"]);
    }

    #[test]
    fn test_render_produces_pdf_bytes() {
        let pdf = render_minutes(
            &RoomId::from("r1"),
            "- we will ship on friday",
            "[00:01] alice: we will ship on friday\n[00:09] bob: agreed\n",
        )
        .unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert!(pdf.len() > 500);
    }

    #[test]
    fn test_long_transcript_paginates() {
        let transcript: String = (0..400)
            .map(|i| format!("[{:02}:{:02}] speaker: line number {i} with some detail\n", i / 60, i % 60))
            .collect();
        let pdf = render_minutes(&RoomId::from("big"), "- summary", &transcript).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }
}
