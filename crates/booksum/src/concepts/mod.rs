//! Concept keywords: the master list with aliases, the pending list of new
//! names, and the vault index notes.

pub mod normalizer;
pub mod vault;

pub use normalizer::{
    classify, concept_key, ConceptClassification, ConceptNormalizer, MasterConcept,
    MasterConcepts, PendingConcept,
};
pub use vault::{BookEntry, VaultIndex};
