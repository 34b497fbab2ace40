use crate::toc::TocChapter;

/// A chapter's inclusive, 1-based page range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRange {
    pub index: usize,
    pub title: String,
    pub start_page: usize,
    pub end_page: usize,
}

/// Turns chapter starts into contiguous ranges. Starts are clamped to the
/// document, entries sharing a start page collapse to the first one, each
/// chapter ends where the next begins and the last ends on the last page.
pub fn compute_chapter_ranges(chapters: &[TocChapter], page_count: usize) -> Vec<ChapterRange> {
    if page_count == 0 {
        return Vec::new();
    }

    let mut starts: Vec<(usize, &str)> = chapters
        .iter()
        .map(|c| (c.start_page.clamp(1, page_count), c.title.as_str()))
        .collect();
    starts.sort_by_key(|(page, _)| *page);
    starts.dedup_by_key(|(page, _)| *page);

    starts
        .iter()
        .enumerate()
        .map(|(index, (start_page, title))| {
            let end_page = starts
                .get(index + 1)
                .map_or(page_count, |(next, _)| next - 1);
            ChapterRange {
                index,
                title: title.to_string(),
                start_page: *start_page,
                end_page,
            }
        })
        .collect()
}
