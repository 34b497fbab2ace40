use crate::error::ProcessError;
use crate::processor::{DocumentFormat, DocumentProcessor, PagedDocument, WindowPayload};

/// Page separator for plain-text documents.
pub const FORM_FEED: char = '\x0C';

pub struct TextProcessor;

impl TextProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for TextProcessor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<PagedDocument, ProcessError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ProcessError::TextExtraction(e.to_string()))?;
        Ok(PagedDocument::new(split_pages(text)))
    }

    fn window(&self, bytes: &[u8], start: usize, end: usize) -> Result<WindowPayload, ProcessError> {
        let document = self.extract_pages(bytes)?;
        let end = end.min(document.page_count());
        let text = document.text_range(start.max(1), end)?;
        Ok(WindowPayload::Text(text))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Text)
    }
}

fn split_pages(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut pages: Vec<String> = text.split(FORM_FEED).map(str::to_string).collect();
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
}

/// Renders one PDF page per entry with the standard Courier font.
/// Non-ASCII characters are replaced by spaces.
pub fn render_text_pdf(pages: &[&str]) -> Result<Vec<u8>, ProcessError> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let content = format_text_for_pdf(page);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| ProcessError::PdfProcessing(e.to_string()))?;

    Ok(buffer)
}

fn format_text_for_pdf(text: &str) -> String {
    let mut content = String::new();
    content.push_str("BT\n");
    content.push_str("/F1 10 Tf\n");
    content.push_str("50 742 Td\n");
    content.push_str("12 TL\n");

    for line in text.lines().take(60) {
        let escaped = escape_pdf_string(line);
        content.push_str(&format!("({}) Tj T*\n", escaped));
    }

    content.push_str("ET\n");
    content
}

fn escape_pdf_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            c if c.is_ascii() && !c.is_control() => c.to_string(),
            _ => " ".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_split_on_form_feed() {
        let processor = TextProcessor::new();
        let doc = processor
            .extract_pages("第1章 はじめに\x0C本文\x0C第2章 結論\x0C".as_bytes())
            .unwrap();
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.pages[2], "第2章 結論");
    }

    #[test]
    fn test_text_without_form_feed_is_one_page() {
        let processor = TextProcessor::new();
        let doc = processor.extract_pages(b"Hello, World!").unwrap();
        assert_eq!(doc.pages, vec!["Hello, World!".to_string()]);
    }

    #[test]
    fn test_window_clamps_to_page_count() {
        let processor = TextProcessor::new();
        let window = processor.window(b"a\x0Cb\x0Cc\x0Cd", 3, 50).unwrap();
        assert_eq!(window, WindowPayload::Text("c\nd".to_string()));
    }

    #[test]
    fn test_supports_text_format() {
        let processor = TextProcessor::new();
        assert!(processor.supports(DocumentFormat::Text));
        assert!(!processor.supports(DocumentFormat::Pdf));
    }

    #[test]
    fn test_render_text_pdf_has_one_page_per_entry() {
        let bytes = render_text_pdf(&["Chapter 1", "body", "Chapter 2 (end)"]).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }
}
