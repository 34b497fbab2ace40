//! Builders for test books and TOC answers.

#![allow(dead_code)]

use booksum::ai::{TocEntry, TocResponse};

/// Builder for a plain-text book with form-feed page breaks.
pub struct BookBuilder {
    pages: Vec<String>,
}

impl BookBuilder {
    /// `page_count` pages of filler text.
    pub fn new(page_count: usize) -> Self {
        Self {
            pages: (1..=page_count)
                .map(|n| format!("Body text on page {}.\nMore prose follows here.", n))
                .collect(),
        }
    }

    /// Puts `line` at the top of `page` (1-based).
    pub fn heading(mut self, page: usize, line: &str) -> Self {
        let body = &self.pages[page - 1];
        self.pages[page - 1] = format!("{}\n{}", line, body);
        self
    }

    /// `第N章` headings, one per listed page, numbered from 1.
    pub fn chapters_at(mut self, pages: &[usize]) -> Self {
        for (i, &page) in pages.iter().enumerate() {
            self = self.heading(page, &format!("第{}章 テーマ{}", i + 1, i + 1));
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.pages.join("\x0C").into_bytes()
    }
}

/// A book whose first `count` pages each open with a distinct chapter heading.
pub fn heading_per_page(count: usize) -> Vec<u8> {
    let pages: Vec<usize> = (1..=count).collect();
    BookBuilder::new(count).chapters_at(&pages).build()
}

/// TOC answer with `(title, start_page)` entries.
pub fn toc(entries: &[(&str, usize)]) -> TocResponse {
    TocResponse {
        chapters: entries
            .iter()
            .map(|(title, page)| TocEntry {
                number: None,
                title: title.to_string(),
                content_start_page: Some(*page),
            })
            .collect(),
        volume_info: None,
    }
}
