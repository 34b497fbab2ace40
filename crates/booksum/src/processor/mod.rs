pub mod pdf;
pub mod source;
pub mod text;

use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

pub use source::{DocumentSource, LocalDocumentSource, ObjectStoreDocumentSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Text,
}

impl DocumentFormat {
    /// PDF by its `%PDF-` magic; anything else must be UTF-8 text.
    pub fn detect(bytes: &[u8]) -> Result<Self, ProcessError> {
        if bytes.starts_with(b"%PDF-") {
            return Ok(DocumentFormat::Pdf);
        }
        match std::str::from_utf8(bytes) {
            Ok(_) => Ok(DocumentFormat::Text),
            Err(_) => Err(ProcessError::UnsupportedFormat(
                "binary data that is neither PDF nor UTF-8 text".to_string(),
            )),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Text => "text/plain",
        }
    }
}

/// Extracted text, one entry per page. Page numbers are 1-based.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagedDocument {
    pub pages: Vec<String>,
}

impl PagedDocument {
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Text of pages `start..=end`, joined by newlines.
    pub fn text_range(&self, start: usize, end: usize) -> Result<String, ProcessError> {
        let page_count = self.page_count();
        if start == 0 || start > end || end > page_count {
            return Err(ProcessError::InvalidRange {
                start,
                end,
                page_count,
            });
        }
        Ok(self.pages[start - 1..end].join("\n"))
    }
}

/// The slice of a document handed to vision analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowPayload {
    /// A standalone PDF holding only the requested pages.
    Pdf(Vec<u8>),
    Text(String),
}

impl WindowPayload {
    pub fn len(&self) -> usize {
        match self {
            WindowPayload::Pdf(bytes) => bytes.len(),
            WindowPayload::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait DocumentProcessor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<PagedDocument, ProcessError>;

    /// Cuts pages `start..=end` (clamped to the page count) out of the document.
    fn window(&self, bytes: &[u8], start: usize, end: usize) -> Result<WindowPayload, ProcessError>;

    fn supports(&self, format: DocumentFormat) -> bool;
}

pub struct ProcessorRegistry {
    processors: Vec<Box<dyn DocumentProcessor>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        let processors: Vec<Box<dyn DocumentProcessor>> = vec![
            Box::new(text::TextProcessor::new()),
            Box::new(pdf::PdfProcessor::new()),
        ];
        Self { processors }
    }

    fn processor_for(&self, bytes: &[u8]) -> Result<&dyn DocumentProcessor, ProcessError> {
        let format = DocumentFormat::detect(bytes)?;
        self.processors
            .iter()
            .find(|p| p.supports(format))
            .map(|p| p.as_ref())
            .ok_or_else(|| ProcessError::UnsupportedFormat(format.mime_type().to_string()))
    }

    /// Extracts per-page text. A document without pages is an error.
    pub fn extract_pages(&self, bytes: &[u8]) -> Result<PagedDocument, ProcessError> {
        let document = self.processor_for(bytes)?.extract_pages(bytes)?;
        if document.page_count() == 0 {
            return Err(ProcessError::EmptyDocument);
        }
        Ok(document)
    }

    pub fn window(&self, bytes: &[u8], start: usize, end: usize) -> Result<WindowPayload, ProcessError> {
        self.processor_for(bytes)?.window(bytes, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(DocumentFormat::detect(b"%PDF-1.5\n...").unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::detect("第1章".as_bytes()).unwrap(), DocumentFormat::Text);
        assert!(matches!(
            DocumentFormat::detect(&[0xff, 0xfe, 0x00]),
            Err(ProcessError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_text_range_is_one_based_and_inclusive() {
        let doc = PagedDocument::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(doc.text_range(2, 3).unwrap(), "b\nc");
        assert_eq!(doc.text_range(1, 1).unwrap(), "a");
        assert!(matches!(
            doc.text_range(0, 1),
            Err(ProcessError::InvalidRange { .. })
        ));
        assert!(doc.text_range(3, 4).is_err());
        assert!(doc.text_range(3, 2).is_err());
    }

    #[test]
    fn test_registry_routes_text() {
        let registry = ProcessorRegistry::new();
        let doc = registry.extract_pages(b"one\x0Ctwo").unwrap();
        assert_eq!(doc.page_count(), 2);
    }

    #[test]
    fn test_registry_rejects_empty_document() {
        let registry = ProcessorRegistry::new();
        assert!(matches!(
            registry.extract_pages(b"   "),
            Err(ProcessError::EmptyDocument)
        ));
    }
}
