use crate::index::{DocId, DocumentRecord, IndexStore};
use crate::query::ParsedQuery;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;

/// Score and matched words of one hit, as computed by the ranking step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub relevance: f64,
    pub matches: Vec<String>,
}

/// A hit joined with its stored document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub document: DocumentRecord,
    pub relevance: f64,
    pub matches: Vec<String>,
    /// Words of the stored text matching the query, for highlighting.
    pub highlights: Vec<String>,
}

/// Ranked hits of one query. Rows only carry scores; documents are loaded on demand.
pub struct SearchResult {
    store: Arc<dyn IndexStore>,
    query: ParsedQuery,
    rows: Vec<(DocId, ResultRow)>,
}

impl SearchResult {
    pub(crate) fn new(store: Arc<dyn IndexStore>, query: ParsedQuery, rows: Vec<(DocId, ResultRow)>) -> Self {
        Self { store, query, rows }
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[(DocId, ResultRow)] {
        &self.rows
    }

    pub fn query(&self) -> &ParsedQuery {
        &self.query
    }

    /// Keep only hits whose document passes `predicate`. Hits whose document vanished are dropped.
    pub fn apply_filter<F>(&mut self, mut predicate: F) -> Result<()>
    where
        F: FnMut(&DocumentRecord) -> bool,
    {
        let ids: Vec<DocId> = self.rows.iter().map(|(id, _)| *id).collect();
        let documents = self.store.documents(&ids)?;
        self.rows.retain(|(id, _)| documents.get(id).map_or(false, &mut predicate));
        Ok(())
    }

    /// Load `count` hits starting at `offset` (`count` 0 loads the rest).
    pub fn results(&self, count: usize, offset: usize) -> Result<Vec<SearchHit>> {
        let count = if count == 0 { usize::MAX } else { count };
        let page: Vec<&(DocId, ResultRow)> = self.rows.iter().skip(offset).take(count).collect();
        let ids: Vec<DocId> = page.iter().map(|(id, _)| *id).collect();
        let mut documents = self.store.documents(&ids)?;

        let mut hits = Vec::with_capacity(page.len());
        for (id, row) in page {
            let Some(document) = documents.remove(id) else { continue };
            let highlights = self.query.matched_terms(&document.text, &document.language);
            // exact zero would otherwise tie with "no score" in callers' sorting
            let relevance = if row.relevance == 0.0 { f64::EPSILON } else { row.relevance };
            hits.push(SearchHit { document, relevance, matches: row.matches.clone(), highlights });
        }
        Ok(hits)
    }
}
