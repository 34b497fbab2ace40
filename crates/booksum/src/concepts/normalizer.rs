use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{get_json, update_json, ObjectStore};

/// `{config_prefix}/master_concepts.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterConcepts {
    #[serde(default)]
    pub concepts: Vec<MasterConcept>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterConcept {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub count: u64,
    /// Jobs that referenced the concept. Lookup only.
    #[serde(default)]
    pub source_refs: Vec<String>,
}

impl MasterConcept {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            count: 0,
            source_refs: Vec::new(),
        }
    }

    fn matches(&self, key: &str) -> bool {
        concept_key(&self.name) == key || self.aliases.iter().any(|a| concept_key(a) == key)
    }
}

/// One entry of `{config_prefix}/pending_concepts.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConcept {
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptClassification {
    /// Canonical master names, in input order.
    pub existing: Vec<String>,
    /// Names not in the master list, in input order.
    pub new: Vec<String>,
}

impl ConceptClassification {
    /// Existing names followed by new ones.
    pub fn all(&self) -> Vec<String> {
        self.existing.iter().chain(self.new.iter()).cloned().collect()
    }
}

/// Matching key: lowercase with whitespace and hyphens removed.
pub fn concept_key(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '‐' | '‑' | '–' | '－' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Splits `concepts` into master-list matches and new names, dropping blanks
/// and duplicates.
pub fn classify(master: &MasterConcepts, concepts: &[String]) -> ConceptClassification {
    let mut seen = HashSet::new();
    let mut result = ConceptClassification::default();

    for raw in concepts {
        let name = raw.trim();
        let key = concept_key(name);
        if key.is_empty() {
            continue;
        }
        match master.concepts.iter().find(|c| c.matches(&key)) {
            Some(known) => {
                if seen.insert(concept_key(&known.name)) {
                    result.existing.push(known.name.clone());
                }
            }
            None => {
                if seen.insert(key) {
                    result.new.push(name.to_string());
                }
            }
        }
    }
    result
}

/// Master and pending concept lists kept in an object store.
pub struct ConceptNormalizer {
    store: Arc<dyn ObjectStore>,
    master_key: String,
    pending_key: String,
}

impl ConceptNormalizer {
    pub fn new(store: Arc<dyn ObjectStore>, config_prefix: &str) -> Self {
        let prefix = config_prefix.trim_end_matches('/');
        Self {
            store,
            master_key: format!("{}/master_concepts.json", prefix),
            pending_key: format!("{}/pending_concepts.json", prefix),
        }
    }

    pub async fn master(&self) -> Result<MasterConcepts, StoreError> {
        Ok(get_json::<MasterConcepts>(self.store.as_ref(), &self.master_key)
            .await?
            .map(|(master, _)| master)
            .unwrap_or_default())
    }

    pub async fn pending(&self) -> Result<Vec<PendingConcept>, StoreError> {
        Ok(get_json::<Vec<PendingConcept>>(self.store.as_ref(), &self.pending_key)
            .await?
            .map(|(pending, _)| pending)
            .unwrap_or_default())
    }

    /// Up to `limit` master names, most used first.
    pub async fn hints(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut concepts = self.master().await?.concepts;
        concepts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        Ok(concepts.into_iter().take(limit).map(|c| c.name).collect())
    }

    /// Classifies `concepts`, bumps usage of matched master entries for
    /// `source_ref` and appends unseen new names to the pending list.
    /// A second call with the same `source_ref` changes nothing.
    pub async fn record(
        &self,
        concepts: &[String],
        source_ref: &str,
    ) -> Result<ConceptClassification, StoreError> {
        let mut classification = ConceptClassification::default();

        update_json(
            self.store.as_ref(),
            &self.master_key,
            |current: Option<&MasterConcepts>| {
                let mut next = current.cloned().unwrap_or_default();
                classification = classify(&next, concepts);

                let mut changed = false;
                for name in &classification.existing {
                    let key = concept_key(name);
                    if let Some(entry) = next.concepts.iter_mut().find(|c| c.matches(&key)) {
                        if !entry.source_refs.iter().any(|r| r == source_ref) {
                            entry.count += 1;
                            entry.source_refs.push(source_ref.to_string());
                            changed = true;
                        }
                    }
                }
                changed.then_some(next)
            },
        )
        .await?;

        if !classification.new.is_empty() {
            let now = Utc::now();
            let new = &classification.new;
            update_json(
                self.store.as_ref(),
                &self.pending_key,
                |current: Option<&Vec<PendingConcept>>| {
                    let mut next = current.cloned().unwrap_or_default();
                    let known: HashSet<String> = next.iter().map(|p| concept_key(&p.name)).collect();
                    let before = next.len();
                    for name in new {
                        if !known.contains(&concept_key(name)) {
                            next.push(PendingConcept {
                                name: name.clone(),
                                first_seen: now,
                                source: source_ref.to_string(),
                            });
                        }
                    }
                    (next.len() > before).then_some(next)
                },
            )
            .await?;
        }

        log::debug!(
            "Concepts for {}: {} existing, {} new",
            source_ref,
            classification.existing.len(),
            classification.new.len()
        );
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{put_json, MemoryStore, PutCondition};

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn master_with(entries: Vec<MasterConcept>) -> MasterConcepts {
        MasterConcepts { concepts: entries }
    }

    #[test]
    fn test_concept_key_ignores_case_space_and_hyphens() {
        assert_eq!(concept_key("Deep Work"), "deepwork");
        assert_eq!(concept_key("deep-work"), "deepwork");
        assert_eq!(concept_key(" DEEP　WORK "), "deepwork");
        assert_eq!(concept_key("競争 戦略"), "競争戦略");
    }

    #[test]
    fn test_classify_matches_names_and_aliases() {
        let mut flow = MasterConcept::new("Flow State");
        flow.aliases.push("Flow".to_string());
        let master = master_with(vec![flow, MasterConcept::new("Deep Work")]);

        let result = classify(
            &master,
            &names(&["flow", "deep-work", "Attention Residue", "Deep Work", "  ", "attention residue"]),
        );

        assert_eq!(result.existing, names(&["Flow State", "Deep Work"]));
        assert_eq!(result.new, names(&["Attention Residue"]));
        assert_eq!(result.all().len(), 3);
    }

    #[tokio::test]
    async fn test_record_updates_counts_once_per_source() {
        let store = Arc::new(MemoryStore::new());
        put_json(
            store.as_ref(),
            "config/master_concepts.json",
            &master_with(vec![MasterConcept::new("Deep Work")]),
            PutCondition::None,
        )
        .await
        .unwrap();
        let normalizer = ConceptNormalizer::new(store, "config");

        let first = normalizer
            .record(&names(&["deep work", "Shallow Work"]), "job-1")
            .await
            .unwrap();
        let again = normalizer
            .record(&names(&["deep work", "Shallow Work"]), "job-1")
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(first.existing, names(&["Deep Work"]));
        assert_eq!(first.new, names(&["Shallow Work"]));

        let master = normalizer.master().await.unwrap();
        assert_eq!(master.concepts[0].count, 1);
        assert_eq!(master.concepts[0].source_refs, names(&["job-1"]));

        let pending = normalizer.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "Shallow Work");
        assert_eq!(pending[0].source, "job-1");
    }

    #[tokio::test]
    async fn test_record_without_master_list_marks_everything_new() {
        let store = Arc::new(MemoryStore::new());
        let normalizer = ConceptNormalizer::new(store, "config/");

        let result = normalizer.record(&names(&["Flow"]), "job-1").await.unwrap();
        assert!(result.existing.is_empty());
        assert_eq!(result.new, names(&["Flow"]));
        assert!(normalizer.master().await.unwrap().concepts.is_empty());
    }

    #[tokio::test]
    async fn test_hints_prefer_frequent_concepts() {
        let store = Arc::new(MemoryStore::new());
        let mut popular = MasterConcept::new("Popular");
        popular.count = 9;
        put_json(
            store.as_ref(),
            "config/master_concepts.json",
            &master_with(vec![MasterConcept::new("Rare"), popular]),
            PutCondition::None,
        )
        .await
        .unwrap();
        let normalizer = ConceptNormalizer::new(store, "config");

        assert_eq!(normalizer.hints(1).await.unwrap(), names(&["Popular"]));
        assert_eq!(normalizer.hints(10).await.unwrap().len(), 2);
    }
}
