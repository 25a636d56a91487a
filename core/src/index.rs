use crate::query::LikePattern;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type DocId = u64;

/// One indexed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocId,
    /// Page tree root the document belongs to.
    pub pid: u64,
    pub url: String,
    pub title: String,
    pub protected: bool,
    pub groups: Vec<u64>,
    /// Size of the rendered page in KiB.
    pub filesize: f64,
    pub language: String,
    /// Normalised page text, used for phrase matching and highlighting.
    pub text: String,
    pub checksum: String,
    /// Unix timestamp of the last write.
    pub tstamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub frequency: u32,
    pub language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub documents: u64,
    pub words: u64,
    pub postings: u64,
}

/// Storage for the document table and the word posting table.
///
/// Postings of a document are only ever written as a whole through [`IndexStore::replace_postings`];
/// the store keeps the per-word document frequencies in step with them.
pub trait IndexStore: Send + Sync {
    fn allocate_id(&self) -> Result<DocId>;
    fn document(&self, id: DocId) -> Result<Option<DocumentRecord>>;
    /// Batch lookup. Ids without a record are skipped.
    fn documents(&self, ids: &[DocId]) -> Result<HashMap<DocId, DocumentRecord>>;
    fn find_by_url(&self, url: &str) -> Result<Option<DocumentRecord>>;
    fn find_by_checksum(&self, pid: u64, checksum: &str) -> Result<Option<DocumentRecord>>;
    /// Insert or overwrite the record stored under `record.id`.
    fn save_document(&self, record: &DocumentRecord) -> Result<()>;
    /// Remove a record together with its postings.
    fn delete_document(&self, id: DocId) -> Result<()>;
    /// Delete every posting of `id`, then write `words` (word -> frequency) in the given language.
    fn replace_postings(&self, id: DocId, language: &str, words: &HashMap<String, u32>) -> Result<()>;
    fn postings(&self, word: &str) -> Result<Vec<(DocId, Posting)>>;
    /// (word, frequency) pairs of one document.
    fn document_terms(&self, id: DocId) -> Result<Vec<(String, u32)>>;
    fn document_frequency(&self, word: &str) -> Result<u32>;
    fn words_like(&self, pattern: &LikePattern) -> Result<Vec<String>>;
    fn document_count(&self) -> Result<u64>;
    fn document_ids(&self, pids: Option<&[u64]>) -> Result<Vec<DocId>>;
    fn purge(&self) -> Result<()>;
    fn stats(&self) -> Result<IndexStats>;
    fn flush(&self) -> Result<()>;
}
