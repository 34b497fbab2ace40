use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ProcessError;
use crate::processor::{DocumentFormat, DocumentProcessor, PagedDocument, WindowPayload};

static RE_SYMBOL_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[：:；;！!．.…‐\-ｉｌ]{3,}").unwrap());
static RE_HORIZONTAL_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

pub struct PdfProcessor;

impl PdfProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for PdfProcessor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<PagedDocument, ProcessError> {
        let _span = tracing::info_span!("processor.pdf", bytes = bytes.len()).entered();

        let doc = load(bytes)?;
        let mut pages = Vec::new();
        for (page_num, _) in doc.get_pages() {
            match doc.extract_text(&[page_num]) {
                Ok(text) => pages.push(clean_extracted_text(&text)),
                Err(e) => {
                    tracing::warn!("Failed to extract text from page {}: {}", page_num, e);
                    pages.push(String::new());
                }
            }
        }

        tracing::debug!(pages = pages.len(), "PDF text extraction complete");
        Ok(PagedDocument::new(pages))
    }

    fn window(&self, bytes: &[u8], start: usize, end: usize) -> Result<WindowPayload, ProcessError> {
        let mut doc = load(bytes)?;
        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let page_count = page_numbers.len();
        let end = end.min(page_count);
        let start = start.max(1);
        if start > end {
            return Err(ProcessError::InvalidRange {
                start,
                end,
                page_count,
            });
        }

        let keep: BTreeSet<usize> = (start..=end).collect();
        let to_delete: Vec<u32> = page_numbers
            .iter()
            .enumerate()
            .filter(|(position, _)| !keep.contains(&(position + 1)))
            .map(|(_, number)| *number)
            .collect();

        doc.delete_pages(&to_delete);
        doc.prune_objects();

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write page window: {}", e)))?;

        tracing::debug!(start, end, bytes = buffer.len(), "Cut PDF page window");
        Ok(WindowPayload::Pdf(buffer))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Pdf)
    }
}

fn load(bytes: &[u8]) -> Result<lopdf::Document, ProcessError> {
    lopdf::Document::load_mem(bytes)
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to load PDF: {}", e)))
}

fn is_artifact_boundary(c: char) -> bool {
    matches!(c, '：' | ':' | '；' | ';' | '！' | '!' | '．' | '.') || c.is_whitespace()
}

fn is_artifact_letter(c: char) -> bool {
    matches!(c, 'I' | 'i' | 'ｉ' | 'ｌ' | 'Ｉ')
}

/// Roman numerals and the English pronoun follow a Latin word ("Part I", "so I").
fn follows_ascii_word(before: &[char]) -> bool {
    before
        .iter()
        .rev()
        .find(|c| !c.is_whitespace())
        .is_some_and(|c| c.is_ascii_alphanumeric())
}

/// Removes common OCR noise from extracted page text:
/// runs of three or more dots, colons, dashes and similar symbols,
/// lone `I`/`i` glyphs wedged between punctuation or whitespace in non-Latin text,
/// and redundant whitespace.
pub fn clean_extracted_text(text: &str) -> String {
    let text = RE_SYMBOL_RUN.replace_all(text, " ");

    let chars: Vec<char> = text.chars().collect();
    let mut without_artifacts = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        let isolated = is_artifact_letter(c)
            && i > 0
            && chars.get(i + 1).is_some_and(|&next| is_artifact_boundary(next))
            && is_artifact_boundary(chars[i - 1])
            && !follows_ascii_word(&chars[..i]);
        if !isolated {
            without_artifacts.push(c);
        }
    }

    let collapsed = RE_HORIZONTAL_SPACE.replace_all(&without_artifacts, " ");
    let collapsed = RE_BLANK_LINES.replace_all(&collapsed, "\n\n");
    collapsed.trim().to_string()
}
