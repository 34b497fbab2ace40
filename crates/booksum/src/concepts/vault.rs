use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::VaultConfig;
use crate::error::StoreError;
use crate::store::{ObjectStore, PutCondition, CAS_ATTEMPTS};

const BOOKS_HEADER: &str = "# Books Index\n\n";
const CONCEPTS_HEADER: &str = "# Concepts Index\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookEntry {
    pub title: String,
    pub author: String,
    pub category: String,
}

impl BookEntry {
    fn line(&self) -> String {
        format!("- [[{}]] ({}) - {}", self.title, self.author, self.category)
    }
}

/// Books and concepts index notes in the output vault.
pub struct VaultIndex {
    store: Arc<dyn ObjectStore>,
    books_key: String,
    concepts_key: String,
}

impl VaultIndex {
    pub fn new(store: Arc<dyn ObjectStore>, vault: &VaultConfig) -> Self {
        Self {
            store,
            books_key: format!("{}/00_Books_Index.md", vault.reading_dir),
            concepts_key: format!("{}/00_Concepts_Index.md", vault.knowledge_dir),
        }
    }

    pub fn books_key(&self) -> &str {
        &self.books_key
    }

    pub fn concepts_key(&self) -> &str {
        &self.concepts_key
    }

    /// Adds or replaces the line for `entry.title`.
    pub async fn add_book(&self, entry: &BookEntry) -> Result<(), StoreError> {
        update_text(self.store.as_ref(), &self.books_key, |current| {
            Some(upsert_book(current.unwrap_or_default(), entry))
        })
        .await
    }

    /// Links `book_title` from each concept's line.
    pub async fn add_concepts(&self, book_title: &str, concepts: &[String]) -> Result<(), StoreError> {
        if concepts.is_empty() {
            return Ok(());
        }
        update_text(self.store.as_ref(), &self.concepts_key, |current| {
            Some(merge_concepts(current.unwrap_or_default(), book_title, concepts))
        })
        .await
    }
}

fn upsert_book(current: &str, entry: &BookEntry) -> String {
    let prefix = format!("- [[{}]]", entry.title);
    let mut lines: Vec<String> = current
        .lines()
        .filter(|l| l.starts_with("- [["))
        .map(str::to_string)
        .collect();

    match lines.iter_mut().find(|l| l.starts_with(&prefix)) {
        Some(line) => *line = entry.line(),
        None => lines.push(entry.line()),
    }

    let mut out = String::from(BOOKS_HEADER);
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn parse_concepts_index(current: &str) -> BTreeMap<String, Vec<String>> {
    let mut index = BTreeMap::new();
    for line in current.lines() {
        let Some(rest) = line.strip_prefix("- [[") else {
            continue;
        };
        let Some((concept, books)) = rest.split_once("]]:") else {
            continue;
        };
        let books: Vec<String> = books
            .split(',')
            .filter_map(|b| {
                let b = b.trim();
                b.strip_prefix("[[")?.strip_suffix("]]").map(str::to_string)
            })
            .collect();
        index.insert(concept.to_string(), books);
    }
    index
}

fn merge_concepts(current: &str, book_title: &str, concepts: &[String]) -> String {
    let mut index = parse_concepts_index(current);
    for concept in concepts {
        let concept = concept.trim();
        if concept.is_empty() {
            continue;
        }
        let books = index.entry(concept.to_string()).or_default();
        if !books.iter().any(|b| b == book_title) {
            books.push(book_title.to_string());
        }
    }

    let mut out = String::from(CONCEPTS_HEADER);
    for (concept, books) in index {
        let links: Vec<String> = books.iter().map(|b| format!("[[{}]]", b)).collect();
        out.push_str(&format!("- [[{}]]: {}\n", concept, links.join(", ")));
    }
    out
}

/// Generation-matched read-modify-write for text notes.
async fn update_text<F>(store: &dyn ObjectStore, key: &str, mut apply: F) -> Result<(), StoreError>
where
    F: FnMut(Option<&str>) -> Option<String> + Send,
{
    for _ in 0..CAS_ATTEMPTS {
        let current = store.get(key).await?;
        let (text, condition) = match &current {
            Some(object) => (
                Some(String::from_utf8_lossy(&object.data).into_owned()),
                PutCondition::GenerationMatch(object.generation),
            ),
            None => (None, PutCondition::DoesNotExist),
        };
        let Some(next) = apply(text.as_deref()) else {
            return Ok(());
        };
        if text.as_deref() == Some(next.as_str()) {
            return Ok(());
        }
        match store.put(key, next.into_bytes(), condition).await {
            Ok(_) => return Ok(()),
            Err(StoreError::PreconditionFailed { .. }) => tokio::task::yield_now().await,
            Err(e) => return Err(e),
        }
    }
    Err(StoreError::Contention {
        key: key.to_string(),
        attempts: CAS_ATTEMPTS,
    })
}
