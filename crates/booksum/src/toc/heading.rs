//! Chapter heading detection over extracted page text.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use super::numerals::parse_numeral;

/// `第N章` / `第N部` / `第N編` / `第N節`, at line start and followed by a
/// separator or the end of the line, so prose like `第一部では` is skipped.
static RE_JAPANESE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t　]*第[ \t　]*([0-9０-９]+|[一二三四五六七八九十百千〇零]+|[壱壹弐貳参參肆伍陸漆捌玖拾]+)[ \t　]*(章|部|編|節)(?:[ \t　:：.．、]|$)",
    )
    .unwrap()
});

static RE_ENGLISH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t　]*(Chapter|CHAPTER|Part|PART)[ \t]+([0-9]+|[IVXLCDM]+|[ivxlcdm]+)(?:[ \t:：.．\-–—]|$)",
    )
    .unwrap()
});

const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeadingKind {
    Chapter,
    Part,
    Section,
    Volume,
}

impl HeadingKind {
    fn from_unit(unit: &str) -> Self {
        match unit {
            "部" => HeadingKind::Part,
            "編" => HeadingKind::Volume,
            "節" => HeadingKind::Section,
            _ => HeadingKind::Chapter,
        }
    }

    fn from_word(word: &str) -> Self {
        if word.eq_ignore_ascii_case("part") {
            HeadingKind::Part
        } else {
            HeadingKind::Chapter
        }
    }
}

/// One heading occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingMatch {
    pub kind: HeadingKind,
    pub number: u32,
    /// The heading line, trimmed.
    pub title: String,
    /// 1-based page of the occurrence.
    pub page: usize,
}

impl HeadingMatch {
    pub fn key(&self) -> (HeadingKind, u32) {
        (self.kind, self.number)
    }
}

/// Every heading occurrence, in document order.
pub fn scan_headings(pages: &[String]) -> Vec<HeadingMatch> {
    let mut matches = Vec::new();
    for (index, text) in pages.iter().enumerate() {
        let page = index + 1;
        let mut on_page: Vec<(usize, HeadingMatch)> = Vec::new();

        for caps in RE_JAPANESE.captures_iter(text) {
            let (Some(whole), Some(numeral), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            if let Some(number) = parse_numeral(numeral.as_str()) {
                on_page.push((
                    whole.start(),
                    HeadingMatch {
                        kind: HeadingKind::from_unit(unit.as_str()),
                        number,
                        title: heading_line(text, whole.start()),
                        page,
                    },
                ));
            }
        }

        for caps in RE_ENGLISH.captures_iter(text) {
            let (Some(whole), Some(word), Some(numeral)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            if let Some(number) = parse_numeral(numeral.as_str()) {
                on_page.push((
                    whole.start(),
                    HeadingMatch {
                        kind: HeadingKind::from_word(word.as_str()),
                        number,
                        title: heading_line(text, whole.start()),
                        page,
                    },
                ));
            }
        }

        on_page.sort_by_key(|(offset, _)| *offset);
        matches.extend(on_page.into_iter().map(|(_, m)| m));
    }
    matches
}

fn heading_line(text: &str, start: usize) -> String {
    let line = text[start..].lines().next().unwrap_or_default().trim();
    line.chars().take(MAX_TITLE_CHARS).collect::<String>().trim().to_string()
}

/// Number of distinct `(kind, number)` headings.
pub fn distinct_count(matches: &[HeadingMatch]) -> usize {
    matches.iter().map(HeadingMatch::key).collect::<HashSet<_>>().len()
}

/// Pages that look like a printed table of contents: at least `threshold`
/// distinct headings on one page.
pub fn contents_pages(matches: &[HeadingMatch], threshold: usize) -> HashSet<usize> {
    let mut per_page: BTreeMap<usize, HashSet<(HeadingKind, u32)>> = BTreeMap::new();
    for m in matches {
        per_page.entry(m.page).or_default().insert(m.key());
    }
    per_page
        .into_iter()
        .filter(|(_, keys)| keys.len() >= threshold)
        .map(|(page, _)| page)
        .collect()
}

/// One entry per distinct heading, placed at its first occurrence outside a
/// contents page (or its first occurrence when it only appears there),
/// ordered by page.
pub fn resolve_chapters(matches: &[HeadingMatch], contents_threshold: usize) -> Vec<HeadingMatch> {
    let contents = contents_pages(matches, contents_threshold);

    let mut first_any: HashMap<(HeadingKind, u32), &HeadingMatch> = HashMap::new();
    let mut first_body: HashMap<(HeadingKind, u32), &HeadingMatch> = HashMap::new();
    let mut order: Vec<(HeadingKind, u32)> = Vec::new();

    for m in matches {
        let key = m.key();
        if !first_any.contains_key(&key) {
            first_any.insert(key, m);
            order.push(key);
        }
        if !contents.contains(&m.page) {
            first_body.entry(key).or_insert(m);
        }
    }

    let mut resolved: Vec<(usize, HeadingMatch)> = order
        .iter()
        .enumerate()
        .filter_map(|(position, key)| {
            first_body
                .get(key)
                .or_else(|| first_any.get(key))
                .map(|m| (position, (*m).clone()))
        })
        .collect();
    resolved.sort_by_key(|(position, m)| (m.page, *position));
    resolved.into_iter().map(|(_, m)| m).collect()
}
