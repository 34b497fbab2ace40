//! Rendering of the final book note.

use std::fmt::Write;

pub const MISSING_CHAPTER: &str = "(Result not found)";
pub const FAILED_SUMMARY: &str = "(Summary generation failed)";

/// Summaries shorter than this are treated as failed.
const MIN_SUMMARY_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterSection {
    pub title: String,
    pub summary: String,
    pub concepts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookNote {
    pub title: String,
    pub author: String,
    /// Suggested sub-category first, then the job category.
    pub categories: Vec<String>,
    /// `YYYY-MM-DD`
    pub processed_date: String,
    pub concepts: Vec<String>,
    pub source: String,
    pub summary: String,
    pub chapters: Vec<ChapterSection>,
}

fn yaml_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.replace('"', "'")))
}

fn yaml_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn wiki_links(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("[[{}]]", v))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn render_book_note(note: &BookNote) -> String {
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "---");
    let _ = writeln!(out, "title: {}", yaml_string(&note.title));
    let _ = writeln!(out, "author: {}", yaml_string(&note.author));
    let _ = writeln!(out, "category: {}", yaml_list(&note.categories));
    let _ = writeln!(out, "processed_date: {}", note.processed_date);
    let _ = writeln!(out, "concepts: {}", yaml_list(&note.concepts));
    let _ = writeln!(out, "source: {}", yaml_string(&note.source));
    let _ = writeln!(out, "---");
    let _ = writeln!(out);

    let _ = writeln!(out, "# {}", note.title);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Metadata");
    let _ = writeln!(out, "- **Author**: {}", note.author);
    let _ = writeln!(out, "- **Source**: {}", note.source);
    let _ = writeln!(out, "- **Topics**: {}", wiki_links(&note.concepts));
    let _ = writeln!(out);

    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out, "{}", note.summary.trim());
    let _ = writeln!(out);

    let _ = writeln!(out, "## Chapter Summaries");
    for chapter in &note.chapters {
        let _ = writeln!(out);
        let _ = writeln!(out, "### {}", chapter.title);
        let summary = chapter.summary.trim();
        if summary.chars().count() < MIN_SUMMARY_CHARS {
            let _ = writeln!(out, "{}", FAILED_SUMMARY);
        } else {
            let _ = writeln!(out, "{}", summary);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "**Key Concepts**: {}", wiki_links(&chapter.concepts));
    }

    out
}
